//! Assigns every intercepted request to exactly one [`RequestClass`].

use std::fmt;

use crate::scope::Scope;
use crate::strategy::Strategy;
use crate::types::Request;

/// The class of an intercepted request, which determines its caching [`Strategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    /// A page navigation, or any request accepting HTML.
    Navigation,
    /// A request to one of the allowlisted remote origins.
    AllowlistedRemote,
    /// Any other request to the worker's own origin.
    SameOriginStatic,
    /// Everything else: cross-origin, non-allowlisted resources.
    Other,
}

impl RequestClass {
    pub fn strategy(self) -> Strategy {
        match self {
            RequestClass::Navigation => Strategy::NetworkFirst,
            RequestClass::AllowlistedRemote => Strategy::StaleWhileRevalidate,
            RequestClass::SameOriginStatic => Strategy::CacheFirst,
            RequestClass::Other => Strategy::NetworkWithCacheFallback,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestClass::Navigation => "navigation",
            RequestClass::AllowlistedRemote => "allowlisted_remote",
            RequestClass::SameOriginStatic => "same_origin_static",
            RequestClass::Other => "other",
        }
    }
}

impl fmt::Display for RequestClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies `request` within `scope`.
///
/// The first matching rule wins:
/// 1. navigations and requests accepting `text/html`,
/// 2. URLs starting with an allowlisted prefix,
/// 3. URLs of the worker's own origin,
/// 4. everything else.
pub fn classify(request: &Request, scope: &Scope) -> RequestClass {
    if request.is_navigation() || request.accepts_html() {
        RequestClass::Navigation
    } else if scope.is_allowlisted(&request.url) {
        RequestClass::AllowlistedRemote
    } else if scope.is_same_origin(&request.url) {
        RequestClass::SameOriginStatic
    } else {
        RequestClass::Other
    }
}
