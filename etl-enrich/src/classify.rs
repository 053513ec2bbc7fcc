use etl_core::config::{ApiRule, UserAgentRule};
use regex::Regex;

/// A [`UserAgentRule`] with its pattern pre-compiled and sorted into
/// priority order, so classification never recompiles a regex per record.
pub struct CompiledUaRule {
    regex: Regex,
    rule: UserAgentRule,
}

pub struct CompiledApiRule {
    regex: Regex,
    category: String,
}

/// Result of user-agent classification.
#[derive(Debug, Clone, Default)]
pub struct UaClassification {
    pub platform: String,
    pub device_type: String,
    pub browser_type: Option<String>,
    pub os_type: Option<String>,
    pub bot_type: Option<String>,
}

pub fn compile_ua_rules(rules: &[UserAgentRule]) -> Vec<CompiledUaRule> {
    let mut sorted: Vec<&UserAgentRule> = rules.iter().collect();
    sorted.sort_by_key(|r| r.priority);
    sorted
        .into_iter()
        .filter_map(|rule| {
            Regex::new(&rule.pattern)
                .map(|regex| CompiledUaRule {
                    regex,
                    rule: rule.clone(),
                })
                .map_err(|e| {
                    tracing::warn!(pattern = %rule.pattern, error = %e, "invalid user-agent rule pattern, skipping");
                    e
                })
                .ok()
        })
        .collect()
}

pub fn compile_api_rules(rules: &[ApiRule]) -> Vec<CompiledApiRule> {
    let mut sorted: Vec<&ApiRule> = rules.iter().collect();
    sorted.sort_by_key(|r| r.priority);
    sorted
        .into_iter()
        .filter_map(|rule| {
            Regex::new(&rule.pattern)
                .map(|regex| CompiledApiRule {
                    regex,
                    category: rule.category.clone(),
                })
                .map_err(|e| {
                    tracing::warn!(pattern = %rule.pattern, error = %e, "invalid API rule pattern, skipping");
                    e
                })
                .ok()
        })
        .collect()
}

/// Priority-ordered, first-match-wins classification. An absent or
/// unmatched user-agent yields `platform="Unknown"`, `device_type="unknown"`.
pub fn classify_user_agent(user_agent: Option<&str>, rules: &[CompiledUaRule]) -> UaClassification {
    let Some(ua) = user_agent else {
        return UaClassification {
            platform: "Unknown".to_string(),
            device_type: "unknown".to_string(),
            ..Default::default()
        };
    };

    for compiled in rules {
        if compiled.regex.is_match(ua) {
            return UaClassification {
                platform: compiled.rule.platform.clone().unwrap_or_else(|| "Unknown".to_string()),
                device_type: compiled
                    .rule
                    .device_type
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                browser_type: compiled.rule.browser_type.clone(),
                os_type: compiled.rule.os_type.clone(),
                bot_type: compiled.rule.bot_type.clone(),
            };
        }
    }

    UaClassification {
        platform: "Unknown".to_string(),
        device_type: "unknown".to_string(),
        ..Default::default()
    }
}

/// Priority-ordered, first-match-wins API classification against the
/// normalized URI. Unmatched URIs map to `"other"`.
pub fn classify_api(normalized_uri: &str, rules: &[CompiledApiRule]) -> String {
    for compiled in rules {
        if compiled.regex.is_match(normalized_uri) {
            return compiled.category.clone();
        }
    }
    "other".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> Vec<UserAgentRule> {
        vec![
            UserAgentRule {
                pattern: "(?i)bot".to_string(),
                priority: 0,
                platform: None,
                platform_version_group: None,
                device_type: Some("bot".to_string()),
                browser_type: None,
                os_type: None,
                bot_type: Some("generic".to_string()),
            },
            UserAgentRule {
                pattern: "(?i)iphone".to_string(),
                priority: 10,
                platform: Some("iOS".to_string()),
                platform_version_group: None,
                device_type: Some("mobile".to_string()),
                browser_type: None,
                os_type: Some("iOS".to_string()),
                bot_type: None,
            },
        ]
    }

    #[test]
    fn first_match_wins_in_priority_order() {
        let compiled = compile_ua_rules(&rules());
        let result = classify_user_agent(Some("Googlebot/2.1 (+http://google.com/bot.html)"), &compiled);
        assert_eq!(result.device_type, "bot");
        assert_eq!(result.bot_type.as_deref(), Some("generic"));
    }

    #[test]
    fn absent_user_agent_is_unknown() {
        let compiled = compile_ua_rules(&rules());
        let result = classify_user_agent(None, &compiled);
        assert_eq!(result.platform, "Unknown");
        assert_eq!(result.device_type, "unknown");
    }

    #[test]
    fn unmatched_api_uri_is_other() {
        let rules = vec![ApiRule {
            pattern: "^/api/".to_string(),
            priority: 0,
            category: "business".to_string(),
        }];
        let compiled = compile_api_rules(&rules);
        assert_eq!(classify_api("/static/app.js", &compiled), "other");
        assert_eq!(classify_api("/api/v1/users", &compiled), "business");
    }
}
