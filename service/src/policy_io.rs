use std::path::Path;

use filegate_core::policy::GatePolicy;

const MAX_POLICY_BYTES: usize = 4 * 1024 * 1024;

pub fn load_policy(path: impl AsRef<Path>) -> anyhow::Result<GatePolicy> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    if bytes.len() > MAX_POLICY_BYTES {
        anyhow::bail!(
            "policy file is too large ({} bytes; max {} bytes)",
            bytes.len(),
            MAX_POLICY_BYTES
        );
    }
    let raw = String::from_utf8(bytes)?;
    let ext = path.extension().and_then(|s| s.to_str());
    let policy: GatePolicy = match ext {
        Some("json") => serde_json::from_str(&raw)?,
        Some("toml") | None => toml::from_str(&raw)?,
        Some(other) => anyhow::bail!("unsupported policy extension: {other}"),
    };
    policy.validate().map_err(anyhow::Error::msg)?;
    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_toml_and_json() {
        let dir = tempfile::tempdir().expect("tempdir");

        let toml_path = dir.path().join("policy.toml");
        std::fs::write(
            &toml_path,
            "[serving]\ndefault_lifetime_secs = 60\n\n[[auth.tokens]]\ntoken_env_var = \"FILEGATE_TOKEN\"\n\n[auth.tokens.actor]\nuser_id = 3\ncourses = [5]\n",
        )
        .expect("write toml");
        let policy = load_policy(&toml_path).expect("toml policy");
        assert_eq!(policy.serving.default_lifetime_secs, 60);
        assert_eq!(policy.auth.tokens[0].actor.courses, vec![5]);

        let json_path = dir.path().join("policy.json");
        std::fs::write(&json_path, r#"{"limits":{"max_concurrency":2}}"#).expect("write json");
        let policy = load_policy(&json_path).expect("json policy");
        assert_eq!(policy.limits.max_concurrency, 2);
    }

    #[test]
    fn rejects_unknown_extension_and_invalid_policy() {
        let dir = tempfile::tempdir().expect("tempdir");

        let yaml = dir.path().join("policy.yaml");
        std::fs::write(&yaml, "").expect("write yaml");
        let err = load_policy(&yaml).expect_err("yaml is unsupported");
        assert!(err.to_string().contains("unsupported policy extension"));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[serving]\nmax_send_bytes = 0\n").expect("write bad");
        assert!(load_policy(&bad).is_err());
    }
}
