//! Gateway dynamic configuration model.
//!
//! The reverse proxy's dynamic configuration is modeled as a tree and only
//! serialized at write time. Each logical route becomes one config map with
//! a single `<service>.yml` data key; a config-watching sidecar aggregates
//! every map carrying the watch labels into the live proxy.
//!
//! Middleware order on a router is insertion order and is observable
//! behavior: strip-prefix before header-rewrite is a different proxy than
//! the reverse.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::Error;

/// One router entry
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Router {
    /// Matching rule, e.g. ``PathPrefix(`/api`)``
    pub rule: String,
    /// Target service name
    pub service: String,
    /// Middleware names applied in list order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub middlewares: Vec<String>,
    /// Router priority; higher wins on overlapping rules
    pub priority: i32,
}

/// One backend server URL
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct Server {
    /// Internal cluster URL
    pub url: String,
}

/// Load balancer of a service
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancer {
    /// Backend servers
    pub servers: Vec<Server>,
}

/// One service entry
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TraefikService {
    /// The service's load balancer
    pub load_balancer: LoadBalancer,
}

/// Middleware variants the operator emits
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum Middleware {
    /// Strip ordered path prefixes before forwarding
    #[serde(rename_all = "camelCase")]
    StripPrefix {
        /// Prefixes in match order
        prefixes: Vec<String>,
    },
    /// Delegate the auth decision to an external endpoint
    #[serde(rename_all = "camelCase")]
    ForwardAuth {
        /// Auth endpoint address
        address: String,
        /// Forward the original headers to the auth endpoint
        #[serde(skip_serializing_if = "Option::is_none")]
        trust_forward_header: Option<bool>,
    },
    /// Header-rewrite plugin moving the forwarded access token into the
    /// Authorization header
    Plugin {
        /// Plugin configuration keyed by plugin name
        #[serde(rename = "header-rewrite")]
        header_rewrite: HeaderRewrite,
    },
}

/// Header-rewrite plugin configuration
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HeaderRewrite {
    /// Source header
    pub from: String,
    /// Destination header
    pub to: String,
    /// Prefix prepended to the rewritten value
    pub prefix: String,
}

/// The `http` section of one route's dynamic configuration
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct HttpConfig {
    /// Routers keyed by name
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub routers: BTreeMap<String, Router>,
    /// Services keyed by name
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, TraefikService>,
    /// Middlewares keyed by name
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub middlewares: BTreeMap<String, Middleware>,
}

/// A complete per-route dynamic configuration document
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct GatewayConfig {
    /// HTTP routing tree
    pub http: HttpConfig,
}

impl GatewayConfig {
    /// Serialize to the YAML body stored under `<service>.yml`
    pub fn to_yaml(&self) -> Result<String, Error> {
        serde_yaml::to_string(self).map_err(|e| Error::serialization(e.to_string()))
    }
}

/// Builder for one logical route.
///
/// Middlewares attach in call order; the rendered router preserves it.
#[derive(Clone, Debug)]
pub struct RouteBuilder {
    name: String,
    rule: String,
    internal_url: String,
    priority: i32,
    middlewares: Vec<(String, Middleware)>,
}

impl RouteBuilder {
    /// Route `name` matching `path_prefix`, forwarding to `internal_url`
    pub fn new(name: &str, path_prefix: &str, internal_url: &str) -> Self {
        Self {
            name: name.to_string(),
            rule: format!("PathPrefix(`{path_prefix}`)"),
            internal_url: internal_url.to_string(),
            priority: 1,
            middlewares: Vec::new(),
        }
    }

    /// Router priority; longer prefixes get higher values
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Strip ordered prefixes before forwarding
    pub fn strip_prefix(mut self, prefixes: &[&str]) -> Self {
        self.middlewares.push((
            format!("{}-strip-prefix", self.name),
            Middleware::StripPrefix {
                prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
            },
        ));
        self
    }

    /// Route auth decisions through an external endpoint
    pub fn forward_auth(mut self, address: &str) -> Self {
        self.middlewares.push((
            format!("{}-forward-auth", self.name),
            Middleware::ForwardAuth {
                address: address.to_string(),
                trust_forward_header: Some(true),
            },
        ));
        self
    }

    /// Move the forwarded access token into the Authorization header
    pub fn header_rewrite(mut self) -> Self {
        self.middlewares.push((
            format!("{}-header-rewrite", self.name),
            Middleware::Plugin {
                header_rewrite: HeaderRewrite {
                    from: "X-Forwarded-Access-Token".to_string(),
                    to: "Authorization".to_string(),
                    prefix: "Bearer ".to_string(),
                },
            },
        ));
        self
    }

    /// Render the complete per-route document
    pub fn build(self) -> GatewayConfig {
        let mut http = HttpConfig::default();

        http.routers.insert(
            self.name.clone(),
            Router {
                rule: self.rule,
                service: self.name.clone(),
                middlewares: self.middlewares.iter().map(|(n, _)| n.clone()).collect(),
                priority: self.priority,
            },
        );
        http.services.insert(
            self.name.clone(),
            TraefikService {
                load_balancer: LoadBalancer {
                    servers: vec![Server {
                        url: self.internal_url,
                    }],
                },
            },
        );
        for (name, middleware) in self.middlewares {
            http.middlewares.insert(name, middleware);
        }

        GatewayConfig { http }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_renders_router_service_and_rule() {
        let config = RouteBuilder::new("server", "/", "http://che-host:8080")
            .priority(1)
            .build();

        let router = config.http.routers.get("server").unwrap();
        assert_eq!(router.rule, "PathPrefix(`/`)");
        assert_eq!(router.service, "server");

        let service = config.http.services.get("server").unwrap();
        assert_eq!(
            service.load_balancer.servers[0].url,
            "http://che-host:8080"
        );
    }

    #[test]
    fn middleware_order_is_insertion_order() {
        let strip_then_rewrite = RouteBuilder::new("r", "/api", "http://svc:8080")
            .strip_prefix(&["/api"])
            .header_rewrite()
            .build();
        let rewrite_then_strip = RouteBuilder::new("r", "/api", "http://svc:8080")
            .header_rewrite()
            .strip_prefix(&["/api"])
            .build();

        let order_a = &strip_then_rewrite.http.routers["r"].middlewares;
        let order_b = &rewrite_then_strip.http.routers["r"].middlewares;
        assert_eq!(order_a, &vec!["r-strip-prefix", "r-header-rewrite"]);
        assert_eq!(order_b, &vec!["r-header-rewrite", "r-strip-prefix"]);
        assert_ne!(order_a, order_b);
    }

    #[test]
    fn header_rewrite_moves_the_forwarded_token() {
        let config = RouteBuilder::new("r", "/", "http://svc:8080")
            .header_rewrite()
            .build();
        let Middleware::Plugin { header_rewrite } = &config.http.middlewares["r-header-rewrite"]
        else {
            panic!("expected plugin middleware");
        };
        assert_eq!(header_rewrite.from, "X-Forwarded-Access-Token");
        assert_eq!(header_rewrite.to, "Authorization");
        assert_eq!(header_rewrite.prefix, "Bearer ");
    }

    #[test]
    fn yaml_body_matches_the_proxy_schema() {
        let config = RouteBuilder::new("server", "/", "http://che-host:8080")
            .strip_prefix(&["/"])
            .forward_auth("http://127.0.0.1:8089")
            .build();
        let yaml = config.to_yaml().unwrap();

        // bit-exact contract pieces the sidecar depends on
        assert!(yaml.contains("http:"));
        assert!(yaml.contains("routers:"));
        assert!(yaml.contains("rule: PathPrefix(`/`)"));
        assert!(yaml.contains("loadBalancer:"));
        assert!(yaml.contains("url: http://che-host:8080"));
        assert!(yaml.contains("stripPrefix:"));
        assert!(yaml.contains("forwardAuth:"));
    }

    #[test]
    fn strip_prefix_preserves_prefix_order() {
        let config = RouteBuilder::new("r", "/", "http://svc:8080")
            .strip_prefix(&["/b", "/a"])
            .build();
        let Middleware::StripPrefix { prefixes } = &config.http.middlewares["r-strip-prefix"]
        else {
            panic!("expected strip prefix");
        };
        assert_eq!(prefixes, &vec!["/b".to_string(), "/a".to_string()]);
    }
}
