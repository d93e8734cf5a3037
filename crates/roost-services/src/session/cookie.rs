use roost_core::constants::SESSION_COOKIE_NAME;
use std::time::Duration;

/// Cookie the HTTP layer must set when a new staging session is minted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: &'static str,
    pub value: String,
    pub max_age: Duration,
    pub http_only: bool,
    /// Off only in local/dev environments.
    pub secure: bool,
    pub same_site: &'static str,
}

impl SessionCookie {
    pub fn new(value: String, max_age: Duration, secure: bool) -> Self {
        Self {
            name: SESSION_COOKIE_NAME,
            value,
            max_age,
            http_only: true,
            secure,
            same_site: "Lax",
        }
    }

    /// Render as a `Set-Cookie` header value.
    pub fn header_value(&self) -> String {
        let mut header = format!(
            "{}={}; Path=/; Max-Age={}; SameSite={}",
            self.name,
            self.value,
            self.max_age.as_secs(),
            self.same_site
        );
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        if self.secure {
            header.push_str("; Secure");
        }
        header
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_value() {
        let cookie = SessionCookie::new("abc".to_string(), Duration::from_secs(21600), true);
        assert_eq!(
            cookie.header_value(),
            "roost_staging=abc; Path=/; Max-Age=21600; SameSite=Lax; HttpOnly; Secure"
        );

        let local = SessionCookie::new("abc".to_string(), Duration::from_secs(60), false);
        assert!(!local.header_value().contains("Secure"));
        assert!(local.header_value().contains("HttpOnly"));
    }
}
