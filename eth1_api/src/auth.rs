//! [Engine API authentication](https://github.com/ethereum/execution-apis/blob/b7c5d3420e00648f456744d121ffbd929862924d/src/engine/authentication.md).

use core::{
    fmt::{Binary, Display, LowerHex, UpperHex},
    ops::Deref,
};
use std::path::PathBuf;

use anyhow::{ensure, Context as _, Result};
use jwt_simple::{
    algorithms::{HS256Key, MACLike as _},
    claims::Claims,
    prelude::Duration,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use static_assertions::assert_not_impl_any;
use thiserror::Error;
use zeroize::Zeroizing;

const JWT_SECRET_MIN_BYTES: usize = 32;

// The execution client rejects tokens whose `iat` is more than 60 seconds away from its clock.
const TOKEN_VALIDITY_SECONDS: u64 = 60;

#[derive(Default, Debug)]
pub struct AuthOptions {
    pub secrets_path: Option<PathBuf>,
    pub id: Option<String>,
    pub version: Option<String>,
}

#[derive(Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct CustomClaims {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    clv: Option<String>,
}

/// Produces `Authorization` headers for engine requests.
///
/// Requests are sent without authentication if no secret is configured.
#[derive(Default)]
pub struct Auth {
    secret: Option<JwtSecret>,
    id: Option<String>,
    version: Option<String>,
}

assert_not_impl_any!(Auth: Clone, Deref, Display, Binary, LowerHex, UpperHex, Serialize);

impl Auth {
    pub fn new(options: AuthOptions) -> Result<Self> {
        let AuthOptions {
            secrets_path,
            id,
            version,
        } = options;

        let secret = secrets_path
            .map(|path| {
                let contents = fs_err::read(path).map(Zeroizing::new)?;
                JwtSecret::parse(contents.as_slice())
            })
            .transpose()?;

        Ok(Self {
            secret,
            id,
            version,
        })
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    pub fn headers(&self) -> Result<Option<HeaderMap>> {
        let Some(secret) = &self.secret else {
            return Ok(None);
        };

        let custom_claims = CustomClaims {
            id: self.id.clone(),
            clv: self.version.clone(),
        };

        // `with_custom_claims` sets `iat` to the current time.
        let validity = Duration::from_secs(TOKEN_VALIDITY_SECONDS);
        let claims = Claims::with_custom_claims(custom_claims, validity);
        let token = Zeroizing::new(secret.key.authenticate(claims)?);

        let mut value = HeaderValue::try_from(format!("Bearer {}", token.as_str()))?;
        value.set_sensitive(true);

        Ok(Some(HeaderMap::from_iter([(AUTHORIZATION, value)])))
    }
}

struct JwtSecret {
    key: HS256Key,
}

assert_not_impl_any!(JwtSecret: Clone, Deref, Display, Binary, LowerHex, UpperHex, Serialize);

impl JwtSecret {
    fn parse(contents: &[u8]) -> Result<Self> {
        let digits = contents.trim_ascii();
        let digits = digits.strip_prefix(b"0x").unwrap_or(digits);

        let bytes = hex::decode(digits)
            .map(Zeroizing::new)
            .context(Error::MalformedSecret)?;

        ensure!(bytes.len() >= JWT_SECRET_MIN_BYTES, Error::SecretTooShort);

        Ok(Self {
            key: HS256Key::from_bytes(bytes.as_slice()),
        })
    }
}

#[derive(Debug, Error)]
#[cfg_attr(test, derive(PartialEq, Eq))]
enum Error {
    #[error("JWT secret must be at least {JWT_SECRET_MIN_BYTES} bytes long")]
    SecretTooShort,
    #[error("JWT secret is not valid hexadecimal")]
    MalformedSecret,
}

#[cfg(test)]
mod tests {
    use jwt_simple::claims::JWTClaims;
    use tempfile::NamedTempFile;
    use test_case::test_case;

    use super::*;

    const SECRET: &str = "a8ecf8012460d00d11a5bd65165c192f705d1ef759afdda5e9db0f2cd29bbf11";

    fn secret_file(contents: &str) -> Result<NamedTempFile> {
        let file = tempfile::Builder::new().suffix(".hex").tempfile()?;
        fs_err::write(file.path(), contents)?;
        Ok(file)
    }

    #[test_case(SECRET; "bare digits")]
    #[test_case("0xa8ecf8012460d00d11a5bd65165c192f705d1ef759afdda5e9db0f2cd29bbf11"; "prefixed digits")]
    #[test_case("a8ecf8012460d00d11a5bd65165c192f705d1ef759afdda5e9db0f2cd29bbf11\r\n"; "trailing newline")]
    fn secret_is_parsed_from(contents: &str) -> Result<()> {
        let secret = JwtSecret::parse(contents.as_bytes())?;
        assert_eq!(hex::encode(secret.key.to_bytes()), SECRET);
        Ok(())
    }

    #[test]
    fn short_secret_is_rejected() -> Result<()> {
        let error = JwtSecret::parse(b"a8ecf8012460d00d11a5bd65165c192f")
            .err()
            .map(|error| error.downcast::<Error>())
            .transpose()?;

        assert_eq!(error, Some(Error::SecretTooShort));

        Ok(())
    }

    #[test]
    fn malformed_secret_is_rejected() -> Result<()> {
        let file = secret_file("not a secret")?;

        let options = AuthOptions {
            secrets_path: Some(file.path().to_path_buf()),
            ..AuthOptions::default()
        };

        Auth::new(options).err().expect("malformed secret should be rejected");

        Ok(())
    }

    #[test]
    fn requests_are_unauthenticated_without_secret() -> Result<()> {
        let auth = Auth::new(AuthOptions::default())?;

        assert!(!auth.is_enabled());
        assert!(auth.headers()?.is_none());

        Ok(())
    }

    #[test]
    fn headers_carry_a_verifiable_token() -> Result<()> {
        let file = secret_file(SECRET)?;

        let auth = Auth::new(AuthOptions {
            secrets_path: Some(file.path().to_path_buf()),
            id: Some("consensus-client".to_owned()),
            version: Some("v1.0.0".to_owned()),
        })?;

        let headers = auth.headers()?.expect("authentication is configured");
        let value = headers.get(AUTHORIZATION).expect("header is present");
        let token = value
            .to_str()?
            .strip_prefix("Bearer ")
            .expect("token uses the bearer scheme");

        let key = HS256Key::from_bytes(&hex::decode(SECRET)?);
        let claims: JWTClaims<CustomClaims> = key.verify_token(token, None)?;

        assert!(value.is_sensitive());
        assert!(claims.issued_at.is_some());
        assert_eq!(claims.custom.id.as_deref(), Some("consensus-client"));
        assert_eq!(claims.custom.clv.as_deref(), Some("v1.0.0"));

        Ok(())
    }
}
