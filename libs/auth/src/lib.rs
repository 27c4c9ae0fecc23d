use std::marker::PhantomData;

use headers::authorization::{Bearer, Credentials};
use http::{header, HeaderMap, Request, Response, StatusCode};
use http_body::Body;
use sha2::{Digest, Sha256};
use tower_http::validate_request::ValidateRequest;

/// Hash a device token the way it is stored in the `devices` table.
pub fn hash_token(token: &str) -> String {
    format!("{:x}", Sha256::digest(token.as_bytes()))
}

/// Extract the bearer token from an `Authorization` header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?;
    Bearer::decode(value).map(|b| b.token().to_string())
}

/// Request validator for a single statically-configured bearer token
/// (admin and internal endpoints). An empty configured token rejects
/// everything rather than opening the endpoint up.
#[derive(Debug)]
pub struct StaticValidate<ResBody> {
    token: String,
    _ty: PhantomData<fn() -> ResBody>,
}

impl<ResBody> StaticValidate<ResBody> {
    pub fn new(token: String) -> Self
    where
        ResBody: Body + Default,
    {
        Self {
            token,
            _ty: PhantomData,
        }
    }
}

impl<ResBody> Clone for StaticValidate<ResBody> {
    fn clone(&self) -> Self {
        Self {
            token: self.token.clone(),
            _ty: PhantomData,
        }
    }
}

impl<B, ResBody> ValidateRequest<B> for StaticValidate<ResBody>
where
    ResBody: Body + Default,
{
    type ResponseBody = ResBody;

    fn validate(&mut self, request: &mut Request<B>) -> Result<(), Response<Self::ResponseBody>> {
        let ok = !self.token.is_empty()
            && bearer_token(request.headers()).is_some_and(|t| constant_time_eq(&t, &self.token));
        if ok {
            Ok(())
        } else {
            let mut res = Response::new(ResBody::default());
            *res.status_mut() = StatusCode::UNAUTHORIZED;
            Err(res)
        }
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::AUTHORIZATION;

    #[test]
    fn hash_token_is_stable_sha256_hex() {
        let hash = hash_token("device-secret-token");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("device-secret-token"));
        assert_ne!(hash, hash_token("device-secret-tokem"));
    }

    #[test]
    fn bearer_token_parses_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn bearer_token_rejects_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Basic dXNlcjpwdw==".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn constant_time_eq_compares() {
        assert!(constant_time_eq("token", "token"));
        assert!(!constant_time_eq("token", "tokem"));
        assert!(!constant_time_eq("token", "token2"));
    }
}
