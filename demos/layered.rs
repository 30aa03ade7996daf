use dragon_config::{ConfigBuilder, NestedDict, Registry};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct AppConfig {
    app: AppSection,
    database: DatabaseSection,
}

#[derive(Debug, Deserialize)]
struct AppSection {
    name: String,
    debug: bool,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct DatabaseSection {
    host: String,
    port: u16,
    name: String,
    url: String,
}

#[derive(Debug)]
struct Mlp {
    layers: i64,
    width: i64,
}

fn main() -> Result<(), dragon_config::Error> {
    // defaults file -> optional local file -> DRAGON__* env -> argv
    let tree = ConfigBuilder::new()
        .with_file("demos/default.yaml", true)
        .with_file("demos/local.yaml", false)
        .with_env("DRAGON", "__")
        .with_args(std::env::args().skip(1))
        .build()?;

    let config: AppConfig = tree.to_plain()?;
    println!("App: {} (debug={})", config.app.name, config.app.debug);
    println!("Database URL: {}", config.database.url);

    let mut models: Registry<Mlp> = Registry::new();
    models.register("mlp", |args| {
        Ok(Mlp {
            layers: args.get("layers")?.as_i64().unwrap_or(1),
            width: args.get("width")?.as_i64().unwrap_or(64),
        })
    })?;
    let model = models.build_from(&tree.child("model")?, &NestedDict::new())?;
    println!("Model: {} layers of width {}", model.layers, model.width);

    Ok(())
}
