use crate::backend::RateLimitInput;
use crate::policy::Policy;
use std::net::{IpAddr, Ipv6Addr};

/// Who is asking for an availability check.
///
/// Sign-up precedes authentication, so most callers are anonymous.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    /// Identifier of the authenticated user, if any.
    pub user_id: Option<String>,
    /// Address of the connection peer, if known.
    pub peer_addr: Option<IpAddr>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            peer_addr: None,
        }
    }

    pub fn with_peer_addr(mut self, peer_addr: Option<IpAddr>) -> Self {
        self.peer_addr = peer_addr;
        self
    }
}

/// Utility to derive the [RateLimitInput] for an availability check.
///
/// Authenticated callers are keyed as `user:<id>`. Anonymous callers are keyed as
/// `anon:<normalized username>` by default, which means a caller probing a different username on
/// every call is never limited. Use [InputBuilder::peer_ip_key] to key anonymous callers by their
/// address instead.
///
/// You should take care to ensure that you are producing unique keys per backend.
#[derive(Debug, Clone)]
pub struct InputBuilder {
    policy: Policy,
    peer_ip_key: bool,
    custom_key: Option<String>,
}

impl InputBuilder {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            peer_ip_key: false,
            custom_key: None,
        }
    }

    /// Key anonymous callers by the connection peer IP, rather than by the username they check.
    ///
    /// Falls back to the username when the peer address is unknown.
    ///
    /// # IPv6
    ///
    /// IPv6 addresses will be grouped into a single key per /64
    pub fn peer_ip_key(mut self) -> Self {
        self.peer_ip_key = true;
        self
    }

    /// Replace the policy, keeping the key options.
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Add a custom prefix to the rate limiting key
    pub fn custom_key(mut self, key: &str) -> Self {
        self.custom_key = Some(key.to_owned());
        self
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Builds the input for a check of an already normalized username.
    pub fn input(&self, caller: &Caller, normalized: &str) -> RateLimitInput {
        let mut components = Vec::new();
        if let Some(custom) = &self.custom_key {
            components.push(custom.clone());
        }
        let identity = match (&caller.user_id, caller.peer_addr) {
            (Some(user_id), _) => format!("user:{user_id}"),
            (None, Some(ip)) if self.peer_ip_key => format!("anon:{}", ip_key(ip)),
            (None, _) => format!("anon:{normalized}"),
        };
        components.push(identity);
        RateLimitInput::new(components.join("-"), self.policy)
    }
}

// Groups IPv6 addresses together, see:
// https://adam-p.ca/blog/2022/02/ipv6-rate-limiting/
fn ip_key(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return v4.to_string();
            }
            let s = v6.segments();
            let subnet = Ipv6Addr::new(s[0], s[1], s[2], s[3], 0, 0, 0, 0);
            format!("{}/64", subnet)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_key() {
        // Check that IPv4 addresses are preserved
        assert_eq!(
            ip_key("142.250.187.206".parse().unwrap()),
            "142.250.187.206"
        );
        // Check that IPv4 mapped addresses are preserved
        assert_eq!(
            ip_key("::FFFF:142.250.187.206".parse().unwrap()),
            "142.250.187.206"
        );
        // Check that IPv6 addresses are grouped into /64 subnets
        assert_eq!(
            ip_key("2a00:1450:4009:81f::200e".parse().unwrap()),
            "2a00:1450:4009:81f::/64"
        );
    }

    #[test]
    fn test_authenticated_key() {
        let builder = InputBuilder::new(Policy::default()).peer_ip_key();
        let caller =
            Caller::authenticated("u123").with_peer_addr(Some("10.0.0.1".parse().unwrap()));
        // The user id wins over the peer address
        assert_eq!(builder.input(&caller, "alice").key, "user:u123");
    }

    #[test]
    fn test_anonymous_key() {
        let builder = InputBuilder::new(Policy::default());
        let caller = Caller::anonymous().with_peer_addr(Some("10.0.0.1".parse().unwrap()));
        // Without peer ip keying the checked username is the key
        assert_eq!(builder.input(&caller, "alice").key, "anon:alice");
        assert_eq!(builder.input(&caller, "bob").key, "anon:bob");
    }

    #[test]
    fn test_peer_ip_key() {
        let builder = InputBuilder::new(Policy::default()).peer_ip_key();
        let caller = Caller::anonymous().with_peer_addr(Some("10.0.0.1".parse().unwrap()));
        assert_eq!(builder.input(&caller, "alice").key, "anon:10.0.0.1");
        assert_eq!(builder.input(&caller, "bob").key, "anon:10.0.0.1");
        // Unknown peers fall back to the username
        assert_eq!(
            builder.input(&Caller::anonymous(), "alice").key,
            "anon:alice"
        );
    }

    #[test]
    fn test_custom_key() {
        let builder = InputBuilder::new(Policy::default()).custom_key("signup");
        let input = builder.input(&Caller::anonymous(), "alice");
        assert_eq!(input.key, "signup-anon:alice");
        assert_eq!(input.max_requests, 5);
    }

    #[test]
    fn test_with_policy_keeps_key_options() {
        let policy = Policy::new(std::time::Duration::from_secs(10), 2);
        let builder = InputBuilder::new(Policy::default())
            .custom_key("signup")
            .peer_ip_key()
            .with_policy(policy);
        let caller = Caller::anonymous().with_peer_addr(Some("10.0.0.1".parse().unwrap()));
        let input = builder.input(&caller, "alice");
        assert_eq!(input.key, "signup-anon:10.0.0.1");
        assert_eq!(input.max_requests, 2);
        assert_eq!(input.interval, std::time::Duration::from_secs(10));
    }
}
