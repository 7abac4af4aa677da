use super::{json_pretty, orchestrator, EXIT_SUCCESS};
use glew_schema::Settings;

pub fn run(settings: &Settings, json: bool) -> Result<u8, String> {
    let years = orchestrator(settings)?.selectable_years();
    let latest = years.last().copied();
    if json {
        let payload = serde_json::json!({
            "network": settings.network.kind.to_string(),
            "years": years.iter().map(|y| y.0).collect::<Vec<_>>(),
            "default": latest.map(|y| y.0),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        for year in &years {
            if Some(*year) == latest {
                println!("{year} (default)");
            } else {
                println!("{year}");
            }
        }
    }
    Ok(EXIT_SUCCESS)
}
