//! Landing page rendering

use minijinja::{Environment, context};

use sysohub_api::responses::DashboardState;

const INDEX: &str = include_str!("../assets/index.html");

/// Render the landing page for `state`
///
/// # Errors
/// Returns the template engine error if rendering fails.
pub fn render_index(state: &DashboardState) -> Result<String, minijinja::Error> {
    let pretty_json = if state.store.is_empty() {
        "{}".to_string()
    } else {
        serde_json::to_string_pretty(&state.store).map_err(|e| {
            minijinja::Error::new(minijinja::ErrorKind::BadSerialization, e.to_string())
        })?
    };

    // `.html` names get HTML auto-escaping
    let mut env = Environment::new();
    env.add_template("index.html", INDEX)?;

    env.get_template("index.html")?.render(context! {
        pretty_json,
        services => &state.services,
        system => &state.system,
        broker_connected => state.broker_connected,
    })
}
