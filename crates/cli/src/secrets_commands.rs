use {
    agora_auth::{SecretValidator, StrengthSeverity, ValidationReport},
    agora_config::AgoraConfig,
    anyhow::Result,
    secrecy::ExposeSecret,
};

/// `agora check-secrets`: print a strength report for each signing secret.
/// Fails when a secret is missing or critically weak, or, in production,
/// when any report is invalid.
pub fn check_secrets(config: &AgoraConfig, production: bool, json: bool) -> Result<()> {
    let validator = SecretValidator::from_policy(&config.secrets);
    let secrets = [
        ("auth.session_secret", config.auth.session_secret.as_ref()),
        ("auth.renewal_secret", config.auth.renewal_secret.as_ref()),
    ];

    let mut reports = Vec::new();
    for (name, secret) in secrets {
        let report = secret.map(|s| validator.validate(s.expose_secret(), production));
        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "name": name,
                    "configured": report.is_some(),
                    "report": report,
                }))?
            );
        } else {
            print_report(name, report.as_ref());
        }
        reports.push((name, report));
    }

    let failed: Vec<&str> = reports
        .iter()
        .filter(|(_, report)| !passes(report.as_ref(), production))
        .map(|(name, _)| *name)
        .collect();
    if !failed.is_empty() {
        anyhow::bail!("weak or missing signing secrets: {}", failed.join(", "));
    }
    Ok(())
}

fn passes(report: Option<&ValidationReport>, production: bool) -> bool {
    match report {
        None => false,
        Some(r) if production => r.is_valid,
        Some(r) => r.severity != StrengthSeverity::Critical,
    }
}

fn print_report(name: &str, report: Option<&ValidationReport>) {
    let Some(report) = report else {
        println!("{name}: not configured");
        return;
    };
    let verdict = if report.is_valid {
        "ok"
    } else {
        "WEAK"
    };
    println!(
        "{name}: {verdict} (severity {:?}, length {}/{}, {} character classes, ~{:.0} bits)",
        report.severity,
        report.length,
        report.required_length,
        report.character_type_count,
        report.entropy_estimate
    );
    if !report.matched_weak_patterns.is_empty() {
        println!("  matched: {}", report.matched_weak_patterns.join(", "));
    }
    for rec in &report.recommendations {
        println!("  - {rec}");
    }
}

#[cfg(test)]
mod tests {
    use {super::*, secrecy::SecretString};

    const STRONG: &str = "Q7#vLp2!xR9@mK4$wT8^zN1&bH6*cJ3(e5)Gy0_Ud%Fa+Ws~Hq=Zr;Xk:Vn?Bm.j";

    fn config(session: &str, renewal: &str) -> AgoraConfig {
        let mut config = AgoraConfig::default();
        config.auth.session_secret = Some(SecretString::new(session.into()));
        config.auth.renewal_secret = Some(SecretString::new(renewal.into()));
        config
    }

    #[test]
    fn strong_secrets_pass() {
        assert!(check_secrets(&config(STRONG, STRONG), true, false).is_ok());
    }

    #[test]
    fn placeholder_fails_everywhere() {
        let err = check_secrets(&config("your-secret-key", STRONG), false, true).unwrap_err();
        assert!(err.to_string().contains("auth.session_secret"));
    }

    #[test]
    fn production_is_stricter() {
        // 40 random-looking characters: long enough outside production only.
        let medium = "Zp3#Lw8!Qx2@Vn7$Tb4^Hm9&Kc1*Rf6(Gs0)Yd5%";
        assert!(check_secrets(&config(medium, STRONG), false, false).is_ok());
        assert!(check_secrets(&config(medium, STRONG), true, false).is_err());
    }

    #[test]
    fn missing_secret_fails() {
        let mut config = config(STRONG, STRONG);
        config.auth.renewal_secret = None;
        assert!(check_secrets(&config, false, false).is_err());
    }
}
