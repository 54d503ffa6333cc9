//! Service lookup by path prefix.
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - Prefixes match on segment boundaries (`/chat` matches `/chat/x`, not `/chatter`)
//! - Longest prefix wins, so nested services can share a parent path
//! - No regex to guarantee O(n) matching

use crate::config::{GatewayConfig, ServiceConfig};

/// Resolves which logical service owns a request path.
#[derive(Debug, Clone, Copy)]
pub struct ServiceMatcher<'a> {
    config: &'a GatewayConfig,
}

impl<'a> ServiceMatcher<'a> {
    pub fn new(config: &'a GatewayConfig) -> Self {
        Self { config }
    }

    /// Return the service with the longest prefix matching `path`.
    pub fn match_path(&self, path: &str) -> Option<&'a ServiceConfig> {
        self.config
            .services
            .iter()
            .filter_map(|service| {
                let prefix = service.prefix();
                prefix_matches(&prefix, path).then_some((prefix.len(), service))
            })
            .max_by_key(|(len, _)| *len)
            .map(|(_, service)| service)
    }
}

fn prefix_matches(prefix: &str, path: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.services.push(ServiceConfig::new(
            "chat",
            "http://chat.internal".parse().unwrap(),
        ));
        let mut orch = ServiceConfig::new("orchestration", "http://orch.internal".parse().unwrap());
        orch.path_prefix = Some("/api/orchestrate".into());
        config.services.push(orch);
        let mut api = ServiceConfig::new("api", "http://api.internal".parse().unwrap());
        api.path_prefix = Some("/api/".into());
        config.services.push(api);
        config
    }

    #[test]
    fn test_default_prefix_is_service_name() {
        let config = config();
        let matcher = ServiceMatcher::new(&config);
        assert_eq!(matcher.match_path("/chat/messages").unwrap().name, "chat");
        assert_eq!(matcher.match_path("/chat").unwrap().name, "chat");
        assert!(matcher.match_path("/chatter").is_none());
    }

    #[test]
    fn test_longest_prefix_wins() {
        let config = config();
        let matcher = ServiceMatcher::new(&config);
        assert_eq!(
            matcher.match_path("/api/orchestrate/run").unwrap().name,
            "orchestration"
        );
        assert_eq!(matcher.match_path("/api/users").unwrap().name, "api");
    }

    #[test]
    fn test_no_match() {
        let config = config();
        assert!(ServiceMatcher::new(&config).match_path("/unknown").is_none());
    }
}
