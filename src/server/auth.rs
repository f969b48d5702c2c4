//   Copyright (c) 2025-2026 The Floe Authors
//   All rights reserved.
//
//   Permission is hereby granted, free of charge, to any person obtaining a copy
//   of this software and associated documentation files (the "Software"), to deal
//   in the Software without restriction, including without limitation the rights
//   to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
//   copies of the Software, and to permit persons to whom the Software is
//   furnished to do so, subject to the following conditions:
//
//   The above copyright notice and this permission notice shall be included in all
//   copies or substantial portions of the Software.
//
//   THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
//   IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
//   FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
//   AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
//   LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
//   OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
//   SOFTWARE.

//! Cleartext password authentication and session parameters.
//!
//! Every connection is challenged with `AuthenticationCleartextPassword` and
//! compared against the configured credential; a mismatch surfaces as
//! SQLSTATE 28P01 and closes the connection. Successful startup announces the
//! parameter set PostgreSQL clients rely on for date and timezone rendering.

use std::collections::HashMap;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password, ServerParameterProvider};
use pgwire::api::ClientInfo;
use pgwire::error::PgWireResult;

/// The PostgreSQL version floe reports to clients.
pub const SERVER_VERSION: &str = "16.6";

/// Hands the configured credential to pgwire's cleartext startup handler,
/// which performs the comparison against the client's `PasswordMessage`.
#[derive(Debug)]
pub struct FloeAuthSource {
    encrypted_password: String,
}

impl FloeAuthSource {
    pub fn new(encrypted_password: String) -> Self {
        FloeAuthSource { encrypted_password }
    }
}

#[async_trait]
impl AuthSource for FloeAuthSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(
            None,
            self.encrypted_password.as_bytes().to_vec(),
        ))
    }
}

/// `ParameterStatus` set sent after `AuthenticationOk`.
#[derive(Debug, Default, Clone)]
pub struct FloeParameterProvider;

impl ServerParameterProvider for FloeParameterProvider {
    fn server_parameters<C>(&self, _client: &C) -> Option<HashMap<String, String>>
    where
        C: ClientInfo,
    {
        let mut params = HashMap::new();
        params.insert("server_version".to_string(), SERVER_VERSION.to_string());
        params.insert("client_encoding".to_string(), "UTF8".to_string());
        params.insert("DateStyle".to_string(), "ISO, MDY".to_string());
        params.insert("IntervalStyle".to_string(), "postgres".to_string());
        params.insert("TimeZone".to_string(), "UTC".to_string());
        params.insert("integer_datetimes".to_string(), "on".to_string());
        Some(params)
    }
}
