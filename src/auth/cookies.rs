use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::{HttpRequest, HttpResponse, HttpResponseBuilder};
use tracing::warn;

use crate::auth::service::IssuedSession;

pub const ACCESS_COOKIE: &str = "access";
pub const RENEWAL_COOKIE: &str = "renewal";

/// Cookie settings derived from configuration.
#[derive(Debug, Clone, Copy)]
pub struct CookiePolicy {
    pub secure: bool,
}

impl CookiePolicy {
    pub fn build(&self, name: &'static str, value: String, max_age_secs: i64) -> Cookie<'static> {
        Cookie::build(name, value)
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Strict)
            .max_age(CookieDuration::seconds(max_age_secs))
            .finish()
    }

    pub fn session_cookies(&self, session: &IssuedSession) -> [Cookie<'static>; 2] {
        [
            self.build(ACCESS_COOKIE, session.access.token.clone(), session.access_max_age_secs()),
            self.build(RENEWAL_COOKIE, session.renewal.token.clone(), session.renewal_max_age_secs()),
        ]
    }

    pub fn cleared_cookies(&self) -> [Cookie<'static>; 2] {
        [
            self.build(ACCESS_COOKIE, String::new(), 0),
            self.build(RENEWAL_COOKIE, String::new(), 0),
        ]
    }

    /// Attach both cookies of a freshly issued pair.
    pub fn set_session(&self, response: &mut HttpResponseBuilder, session: &IssuedSession) {
        for cookie in self.session_cookies(session) {
            response.cookie(cookie);
        }
    }

    pub fn clear_session(&self, response: &mut HttpResponseBuilder) {
        for cookie in self.cleared_cookies() {
            response.cookie(cookie);
        }
    }
}

/// Attach cookies to an already built response, e.g. an error response.
pub fn attach(response: &mut HttpResponse, cookies: [Cookie<'static>; 2]) {
    for cookie in cookies {
        if let Err(e) = response.add_cookie(&cookie) {
            warn!("Failed to attach cookie {}: {}", cookie.name(), e);
        }
    }
}

/// Tokens carried by an inbound request.
#[derive(Debug, Default)]
pub struct SessionCookies {
    pub access: Option<String>,
    pub renewal: Option<String>,
}

impl SessionCookies {
    pub fn from_request(req: &HttpRequest) -> Self {
        let read = |name: &str| {
            req.cookie(name)
                .map(|c| c.value().to_string())
                .filter(|v| !v.is_empty())
        };

        Self {
            access: read(ACCESS_COOKIE),
            renewal: read(RENEWAL_COOKIE),
        }
    }
}
