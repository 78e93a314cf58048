//! Signing-secret checks run at startup and on configuration reload.

use {
    agora_config::{AuthConfig, Environment, SecretPolicyConfig},
    secrecy::{ExposeSecret, SecretString},
    serde::Serialize,
    thiserror::Error,
    tracing::{info, warn},
};

use crate::{
    events::{SecurityEventKind, SecurityLog, Severity},
    secret_strength::{SecretValidator, StrengthSeverity, ValidationReport},
};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{name} is not configured")]
    MissingSecret { name: &'static str },
    #[error("{name} is critically weak ({patterns})")]
    CriticalSecret {
        name: &'static str,
        patterns: String,
    },
}

/// Outcome for one configured secret.
#[derive(Debug, Clone, Serialize)]
pub struct SecretCheck {
    pub name: &'static str,
    pub configured: bool,
    /// `None` when the secret is missing.
    pub report: Option<ValidationReport>,
}

impl SecretCheck {
    pub fn is_critical(&self) -> bool {
        self.report
            .as_ref()
            .is_some_and(|r| r.severity == StrengthSeverity::Critical)
    }
}

/// Validate both signing secrets from `[auth]` against `policy`.
///
/// In production a missing or critically weak secret is an error. Outside
/// production every finding is logged and the checks are returned. Identical
/// session and renewal secrets are always reported as a high finding.
pub fn validate_configured_secrets(
    auth: &AuthConfig,
    policy: &SecretPolicyConfig,
    environment: Environment,
    events: &SecurityLog,
) -> Result<Vec<SecretCheck>, StartupError> {
    let validator = SecretValidator::from_policy(policy);
    let production = environment.is_production();

    let checks = vec![
        check_one(
            &validator,
            "auth.session_secret",
            auth.session_secret.as_ref(),
            production,
            events,
        ),
        check_one(
            &validator,
            "auth.renewal_secret",
            auth.renewal_secret.as_ref(),
            production,
            events,
        ),
    ];

    if let (Some(a), Some(b)) = (&auth.session_secret, &auth.renewal_secret)
        && a.expose_secret() == b.expose_secret()
    {
        events.emit(
            SecurityEventKind::WeakSecret,
            Severity::High,
            "startup",
            "session and renewal secrets are identical",
        );
    }

    if production {
        for check in &checks {
            if !check.configured {
                return Err(StartupError::MissingSecret { name: check.name });
            }
            if let Some(report) = check.report.as_ref().filter(|_| check.is_critical()) {
                return Err(StartupError::CriticalSecret {
                    name: check.name,
                    patterns: report.matched_weak_patterns.join(", "),
                });
            }
        }
    }
    Ok(checks)
}

fn check_one(
    validator: &SecretValidator,
    name: &'static str,
    secret: Option<&SecretString>,
    production: bool,
    events: &SecurityLog,
) -> SecretCheck {
    let Some(secret) = secret else {
        let severity = if production {
            Severity::Critical
        } else {
            Severity::Medium
        };
        events.emit(
            SecurityEventKind::WeakSecret,
            severity,
            name,
            "signing secret not configured",
        );
        return SecretCheck {
            name,
            configured: false,
            report: None,
        };
    };

    let report = validator.validate(secret.expose_secret(), production);
    if report.is_valid {
        info!(secret = name, entropy = report.entropy_estimate, "signing secret ok");
    } else {
        let severity = match report.severity {
            StrengthSeverity::Critical => Severity::Critical,
            StrengthSeverity::High => Severity::High,
            StrengthSeverity::Ok => Severity::Medium,
        };
        events.emit(
            SecurityEventKind::WeakSecret,
            severity,
            name,
            format!(
                "weak signing secret: {}",
                if report.matched_weak_patterns.is_empty() {
                    report.recommendations.join("; ")
                } else {
                    report.matched_weak_patterns.join(", ")
                }
            ),
        );
        for rec in &report.recommendations {
            warn!(secret = name, "{rec}");
        }
    }
    SecretCheck {
        name,
        configured: true,
        report: Some(report),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STRONG_A: &str =
        "Q7#vLp2!xR9@mK4$wT8^zN1&bH6*cJ3(e5)Gy0_Ud%Fa+Ws~Hq=Zr;Xk:Vn?Bm.j";
    const STRONG_B: &str =
        "p4!Rz8@Lw2#Nq6$Tx0%Vb3^Hd7&Jm1*Kf5(Sg9)Yc-Ea+Ou=Ii[Gh]Ml{Pk}Wn;A";

    fn auth(session: Option<&str>, renewal: Option<&str>) -> AuthConfig {
        AuthConfig {
            session_secret: session.map(|s| SecretString::new(s.into())),
            renewal_secret: renewal.map(|s| SecretString::new(s.into())),
            ..AuthConfig::default()
        }
    }

    #[test]
    fn strong_distinct_secrets_pass_in_production() {
        let log = SecurityLog::new();
        let checks = validate_configured_secrets(
            &auth(Some(STRONG_A), Some(STRONG_B)),
            &SecretPolicyConfig::default(),
            Environment::Production,
            &log,
        )
        .unwrap();
        assert!(checks.iter().all(|c| c.report.as_ref().unwrap().is_valid));
        assert_eq!(log.count(SecurityEventKind::WeakSecret), 0);
    }

    #[test]
    fn placeholder_aborts_production() {
        let log = SecurityLog::new();
        let err = validate_configured_secrets(
            &auth(Some("your-secret-key"), Some(STRONG_B)),
            &SecretPolicyConfig::default(),
            Environment::Production,
            &log,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            StartupError::CriticalSecret {
                name: "auth.session_secret",
                ..
            }
        ));
        assert_eq!(log.alerts_raised(), 1);
    }

    #[test]
    fn placeholder_only_warns_in_development() {
        let log = SecurityLog::new();
        let checks = validate_configured_secrets(
            &auth(Some("your-secret-key"), None),
            &SecretPolicyConfig::default(),
            Environment::Development,
            &log,
        )
        .unwrap();
        assert!(checks[0].is_critical());
        assert!(!checks[1].configured);
        assert_eq!(log.count(SecurityEventKind::WeakSecret), 2);
    }

    #[test]
    fn missing_secret_aborts_production() {
        let err = validate_configured_secrets(
            &auth(Some(STRONG_A), None),
            &SecretPolicyConfig::default(),
            Environment::Production,
            &SecurityLog::new(),
        )
        .unwrap_err();
        assert!(matches!(err, StartupError::MissingSecret {
            name: "auth.renewal_secret"
        }));
    }

    #[test]
    fn identical_secrets_are_flagged() {
        let log = SecurityLog::new();
        validate_configured_secrets(
            &auth(Some(STRONG_A), Some(STRONG_A)),
            &SecretPolicyConfig::default(),
            Environment::Production,
            &log,
        )
        .unwrap();
        let recent = log.recent();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].severity, Severity::High);
    }
}
