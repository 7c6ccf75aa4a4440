use super::rule::clamp_rate;
use serde::Deserialize;
use std::collections::HashMap;

/// Key of the rate the agent applies to services it has no specific rate for.
const DEFAULT_KEY: &str = "service:,env:";

/// Per service/env sampling rates computed by the agent.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct AgentRates {
    by_service: HashMap<String, f64>,
}

#[derive(Deserialize)]
struct AgentResponse {
    #[serde(default)]
    rate_by_service: HashMap<String, f64>,
}

impl AgentRates {
    /// Parses an agent response body such as
    /// `{"rate_by_service":{"service:web,env:prod":0.5,"service:,env:":1}}`.
    pub(crate) fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let response: AgentResponse = serde_json::from_str(json)?;
        Ok(AgentRates {
            by_service: response
                .rate_by_service
                .into_iter()
                .map(|(key, rate)| (key, clamp_rate(rate)))
                .collect(),
        })
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_service.is_empty()
    }

    /// Rate for the service/env pair, falling back to the agent default.
    pub(crate) fn rate_for(&self, service: &str, env: &str) -> Option<f64> {
        self.by_service
            .get(&format!("service:{},env:{}", service, env))
            .or_else(|| self.by_service.get(DEFAULT_KEY))
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_falls_back_to_default_key() {
        let rates = AgentRates::from_json(
            r#"{"rate_by_service":{"service:web,env:prod":0.5,"service:,env:":0.8}}"#,
        )
        .unwrap();

        assert_eq!(rates.rate_for("web", "prod"), Some(0.5));
        assert_eq!(rates.rate_for("web", "staging"), Some(0.8));
        assert_eq!(rates.rate_for("db", ""), Some(0.8));
    }

    #[test]
    fn missing_default_yields_none() {
        let rates =
            AgentRates::from_json(r#"{"rate_by_service":{"service:web,env:prod":2.0}}"#).unwrap();
        assert_eq!(rates.rate_for("web", "prod"), Some(1.0));
        assert_eq!(rates.rate_for("api", "prod"), None);
    }

    #[test]
    fn malformed_body_is_an_error() {
        assert!(AgentRates::from_json("[1,2]").is_err());
        assert!(AgentRates::from_json("{}").unwrap().is_empty());
    }
}
