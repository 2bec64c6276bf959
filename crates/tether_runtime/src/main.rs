//! Tether Runtime
//!
//! Boots a bridge on the QuickJS engine, publishes a few host values, drives
//! them from the host side and then from script code.
//!
//! Usage: `tether [config.json] [script.js]`

use anyhow::{Context, Result};
use tether_core::{
    reflect_struct, register_package_pusher, Bridge, BridgeConfig, Callback, HostStruct, Rest,
    Shared, StructBuilder,
};
use tether_script::{QuickJsEngine, ScriptEngine};
use std::path::Path;

#[derive(Debug, Clone, Default)]
struct Player {
    name: String,
    health: i32,
    level: u8,
}

impl HostStruct for Player {
    const NAME: &'static str = "Player";

    fn describe(builder: StructBuilder<Self>) -> StructBuilder<Self> {
        builder
            .field("Name", |p| p.name.clone(), |p, v| p.name = v)
            .field("Health", |p| p.health, |p, v| p.health = v)
            .field("Level", |p| p.level, |p, v| p.level = v)
            .value_method("Describe", |p| move || format!("{} (lvl {})", p.name, p.level))
            .method("Damage", |this| {
                move |amount: i32| {
                    let mut player = this.borrow_mut();
                    player.health -= amount;
                    player.health
                }
            })
    }
}

reflect_struct!(Player);

fn load_config() -> Result<BridgeConfig> {
    match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {path}"))?;
            BridgeConfig::from_json_str(&text).with_context(|| format!("parsing config {path}"))
        }
        None => Ok(BridgeConfig::default()),
    }
}

const DEMO_SCRIPT: &str = r#"
player.name = "Grace";
const hits = [5, 7].map((amount) => player.damage(amount));
JSON.stringify({ player, keys: Object.keys(player), hits, total: math.sum(...hits) })
"#;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    tracing::info!("Tether v{}", tether_core::VERSION);
    let config = load_config()?;
    let namespace = config.namespace.clone();

    register_package_pusher("math", |package| {
        package
            .function("sum", |values: Rest<f64>| values.0.iter().sum::<f64>())
            .function("clamp", |x: f64, lo: f64, hi: f64| x.clamp(lo, hi));
    });

    let engine = QuickJsEngine::new().map_err(|err| anyhow::anyhow!("creating script engine: {err}"))?;
    let bridge = Bridge::with_config(engine, config)?;
    let runtime = bridge.runtime();
    let engine = bridge.engine().clone();

    // Live proxy: script writes land in the host struct.
    let player = Shared::new(Player {
        name: "Ada".into(),
        health: 100,
        level: 3,
    });
    bridge.push_global_proxy("player", player.clone())?;
    runtime.set("player.level", engine.number(260.0))?;
    let health = runtime.call("player.damage", &[engine.number(15.0)])?;
    tracing::info!(
        health = engine.to_display_string(&health),
        level = player.borrow().level,
        "player updated from script"
    );

    // Snapshot and constructor
    bridge.push_global_struct("snapshot", player.borrow().clone())?;
    let description = runtime.call("snapshot.describe", &[])?;
    let keys = runtime.keys("snapshot")?;
    tracing::info!(?keys, "{}", engine.to_display_string(&description));

    bridge.push_global_type::<Player>("Player")?;
    let fresh = runtime.construct("Player", &[])?;
    tracing::info!(json = ?engine.json_encode(&fresh).ok().flatten(), "constructed player");

    // Host function taking a script callback
    bridge.push_global_function("twice", |f: Callback<(i64,), i64>, x: i64| f.call((f.call((x,)),)))?;
    let increment = engine.native("increment", |engine, _this, args| {
        let x = args.first().and_then(|a| engine.as_number(a)).unwrap_or_default();
        Ok(engine.number(x + 1.0))
    });
    let result = runtime.call("twice", &[increment, engine.number(40.0)])?;
    tracing::info!(result = engine.to_display_string(&result), "callback round trip");

    // Packages
    let math = runtime.call(&format!("{namespace}.require"), &[engine.string("math")])?;
    engine
        .global_set("math", math)
        .map_err(|thrown| runtime.thrown(thrown))?;
    let args = [engine.number(1.0), engine.number(2.0), engine.number(3.5)];
    let sum = runtime.call("math.sum", &args)?;
    tracing::info!(sum = engine.to_display_string(&sum), "package function");

    if let Err(err) = runtime.get("player.mana") {
        tracing::info!(code = err.code(), "{err}");
    }

    // Script code
    let summary = runtime.execute(DEMO_SCRIPT)?;
    tracing::info!(
        health = player.borrow().health,
        "script: {}",
        engine.to_display_string(&summary)
    );
    if let Some(path) = std::env::args().nth(2) {
        let result = runtime.execute_file(Path::new(&path))?;
        tracing::info!(path, "script result: {}", engine.to_display_string(&result));
    }

    let released = bridge.teardown();
    tracing::info!(released, "bridge torn down");
    Ok(())
}
