//! A small negotiated site.
//!
//! ```text
//! cargo run --example hello
//! curl localhost:5555/people/alice
//! curl -H 'Accept: application/json' localhost:5555/people/alice
//! curl -c jar -b jar localhost:5555/visits
//! ```

use resin::template::Values;
use resin::{AppClass, Config, MemoryDirectory, Request, Response, Result, Server};
use serde_json::json;
use tracing_subscriber::EnvFilter;

async fn home(req: Request) -> Result<Response> {
    let url = req.build_url("person", &[("name", "alice")])?;
    Ok(Response::html(format!(r#"<a href="{url}">say hi</a>"#)))
}

async fn person(req: Request) -> Result<Response> {
    let name = req.param("name").unwrap_or("nobody").to_owned();
    let mut keywords = Values::new();
    keywords.insert("name".into(), json!(name));
    resin::negotiation::respond(&req, &json!({ "name": name }), "person", &Values::new(), keywords)
}

async fn visits(req: Request) -> Result<String> {
    let session = req.session()?;
    let count = session.get("visits").and_then(|v| v.as_u64()).unwrap_or(0) + 1;
    session.insert("visits", count);
    Ok(format!("visit #{count}\n"))
}

/// Substitutes `{{key}}` with string values. Enough for a demo.
fn substitute(req: &Request, path: &str, values: &Values) -> Result<String> {
    let mut text = req.app()?.template_directory().read_to_string(path)?;
    for (key, value) in values {
        let value = value.as_str().map_or_else(|| value.to_string(), str::to_owned);
        text = text.replace(&format!("{{{{{key}}}}}"), &value);
    }
    Ok(text)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let templates = MemoryDirectory::new()
        .with("person.html.subst", "<p>{{name}} says hi</p>\n")
        .with("person.txt.subst", "{{name}} says hi\n");

    let mut class = AppClass::new("Hello");
    class
        .set_template_directory(templates)
        .add_template_engine("subst", substitute)?
        .associate_mimetypes([("text/html", "html"), ("text/plain", "txt")])?
        .serializer(&["application/json"], |_req, value| Ok(serde_json::to_string(value)?))?
        .route("/", home)?
        .route("/people/{name}", person)?
        .route("/visits", visits)?;

    let app = class.instantiate(Config::new())?;
    Server::bind("127.0.0.1:5555")?.serve(app).await
}
