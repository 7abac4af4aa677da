use super::new_wallet::first_run;
use glew_schema::Settings;
use std::path::Path;

pub fn parse_entropy(input: &str) -> Result<Vec<u8>, String> {
    let entropy = hex::decode(input.trim()).map_err(|e| format!("invalid entropy: {e}"))?;
    if entropy.is_empty() {
        return Err("invalid entropy: empty".to_owned());
    }
    Ok(entropy)
}

pub fn run(
    settings: &Settings,
    data_dir: &Path,
    entropy: &str,
    year: Option<u16>,
    json: bool,
) -> Result<u8, String> {
    let entropy = parse_entropy(entropy)?;
    first_run(settings, data_dir, year, json, "recovering", move |controller, year, done| {
        controller.recover_wallet(entropy, year, done);
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entropy_must_be_hex() {
        assert_eq!(parse_entropy("00ff").unwrap(), vec![0, 255]);
        assert!(parse_entropy("zz").unwrap_err().starts_with("invalid entropy"));
        assert!(parse_entropy("").is_err());
    }
}
