mod apps;
mod assets;
mod browser;
mod config;
mod docs;
mod error;
mod http;
mod launcher;
mod page;
mod server;

use crate::apps::load_apps;
use crate::assets::{prepare_served_root, IconStore};
use crate::config::{
    ensure_parent, load_config, read_config_from_str, resolve_base_dir, resolve_config_path,
    Portal, DEFAULT_CONFIG_YAML,
};
use crate::docs::index_docs;
use crate::error::PortalError;
use crate::launcher::{launcher_from_config, run_command, ShellLauncher};
use crate::page::generate_site;
use crate::server::{portal_ping, ServerState};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ldportal", version, about = "LiveDistro portal")]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory that relative paths in the config resolve against.
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate the portal page, serve it and open the browser.
    Serve {
        #[arg(long)]
        port: Option<u16>,
        #[arg(long, default_value_t = false)]
        no_browser: bool,
    },
    /// Regenerate the portal page without serving it.
    Generate,
    Apps,
    Docs,
    /// Launch a command the same way the portal does.
    Launch {
        cmd: String,
    },
    Status,
    Url,
    Paths,
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    Doctor,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    Init,
    Show,
    Validate,
}

#[derive(Debug, Serialize)]
struct JsonResult<T: Serialize> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Clone)]
struct Context {
    config_path: PathBuf,
    base_dir: PathBuf,
    json: bool,
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => matches!(value.trim(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if env_bool("LDPORTAL_LOG_JSON", false) {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init();
    }
}

fn main() -> Result<(), PortalError> {
    let cli = Cli::parse();
    init_tracing();
    let ctx = build_context(&cli);

    let result = match cli.command {
        Commands::Serve { port, no_browser } => handle_serve(&ctx, port, no_browser),
        Commands::Generate => handle_generate(&ctx),
        Commands::Apps => handle_apps(&ctx),
        Commands::Docs => handle_docs(&ctx),
        Commands::Launch { cmd } => handle_launch(&ctx, &cmd),
        Commands::Status => handle_status(&ctx),
        Commands::Url => handle_url(&ctx),
        Commands::Paths => handle_paths(&ctx),
        Commands::Config { command } => handle_config(&ctx, command),
        Commands::Doctor => handle_doctor(&ctx),
    };

    if let Err(err) = result {
        if ctx.json {
            let payload = JsonResult::<serde_json::Value> {
                ok: false,
                result: None,
                error: Some(err.to_string()),
            };
            print_json(&payload)?;
        } else {
            eprintln!("{err}");
        }
        std::process::exit(1);
    }

    Ok(())
}

fn build_context(cli: &Cli) -> Context {
    Context {
        config_path: resolve_config_path(cli.config.as_ref()),
        base_dir: resolve_base_dir(cli.base_dir.as_ref()),
        json: cli.json,
    }
}

fn load_portal(ctx: &Context) -> Result<Portal, PortalError> {
    let cfg = load_config(&ctx.config_path)?;
    Ok(Portal::from_config(&cfg, &ctx.base_dir))
}

fn handle_serve(ctx: &Context, port: Option<u16>, no_browser: bool) -> Result<(), PortalError> {
    let mut portal = load_portal(ctx)?;
    if let Some(port) = port {
        if port == 0 {
            return Err(PortalError::Config("--port must be non-zero".to_string()));
        }
        portal.port = port;
    }
    let open_browser = portal.browser.open && !no_browser;

    prepare_served_root(&mut portal)?;
    let page = generate_site(&portal)?;

    let listener = match server::bind(&portal) {
        Ok(listener) => listener,
        Err(err) if err.kind() == io::ErrorKind::AddrInUse => {
            if portal_ping(&portal.base_url()).is_err() {
                return Err(PortalError::Process(format!(
                    "port {} is in use by another process",
                    portal.port
                )));
            }
            info!(url = %portal.index_url(), "portal already running");
            if open_browser {
                browser::open_url(&portal.browser, &portal.index_url());
            }
            return output(
                ctx,
                json!({"url": portal.index_url(), "already_running": true}),
            );
        }
        Err(err) => return Err(err.into()),
    };

    if ctx.json {
        output(
            ctx,
            json!({"url": portal.index_url(), "already_running": false, "page": page}),
        )?;
    } else {
        println!("LiveDistro Portal is running");
        println!("   Open: {}", portal.index_url());
    }
    if open_browser {
        browser::open_after_delay(portal.browser.clone(), portal.index_url());
    }

    let state = Arc::new(ServerState {
        launcher: launcher_from_config(&portal.launcher),
        portal,
    });
    server::serve(listener, state)
}

fn handle_generate(ctx: &Context) -> Result<(), PortalError> {
    let mut portal = load_portal(ctx)?;
    prepare_served_root(&mut portal)?;
    let page = generate_site(&portal)?;
    output(ctx, serde_json::to_value(&page)?)
}

fn handle_apps(ctx: &Context) -> Result<(), PortalError> {
    let mut portal = load_portal(ctx)?;
    prepare_served_root(&mut portal)?;
    let icons = IconStore::new(&portal.icons_dir);
    let apps = load_apps(&portal.apps_file, &icons);
    if ctx.json {
        return output(ctx, serde_json::to_value(&apps)?);
    }
    if apps.is_empty() {
        println!("No applications in {}", portal.apps_file.display());
    }
    for app in &apps {
        println!("{}\t{}\t{}", app.name, app.exec, app.icon_url);
    }
    Ok(())
}

fn handle_docs(ctx: &Context) -> Result<(), PortalError> {
    let portal = load_portal(ctx)?;
    let docs = index_docs(&portal.docs_dir);
    if ctx.json {
        return output(ctx, serde_json::to_value(&docs)?);
    }
    if docs.is_empty() {
        println!("No help documents in {}", portal.docs_dir.display());
    }
    for doc in &docs {
        println!("{}\t{}", doc.name, doc.relative_path);
    }
    Ok(())
}

fn handle_launch(ctx: &Context, cmd: &str) -> Result<(), PortalError> {
    let portal = load_portal(ctx)?;
    let launcher = launcher_from_config(&portal.launcher);
    if !run_command(launcher.as_ref(), cmd) {
        return Err(PortalError::Process(format!(
            "failed to launch command: {cmd}"
        )));
    }
    output(ctx, json!({"launched": true, "cmd": cmd}))
}

fn handle_status(ctx: &Context) -> Result<(), PortalError> {
    let portal = load_portal(ctx)?;
    let running = portal_ping(&portal.base_url()).is_ok();
    output(ctx, json!({"running": running, "url": portal.index_url()}))
}

fn handle_url(ctx: &Context) -> Result<(), PortalError> {
    let portal = load_portal(ctx)?;
    if ctx.json {
        return output(ctx, json!({"url": portal.index_url()}));
    }
    println!("{}", portal.index_url());
    Ok(())
}

fn handle_paths(ctx: &Context) -> Result<(), PortalError> {
    let portal = load_portal(ctx)?;
    output(
        ctx,
        json!({
            "config": ctx.config_path,
            "config_exists": ctx.config_path.exists(),
            "base_dir": portal.base_dir,
            "apps_file": portal.apps_file,
            "docs_dir": portal.docs_dir,
            "web_dir": portal.web_dir,
            "icons_dir": portal.icons_dir,
            "page": portal.page_path(),
            "background": portal.background_source,
        }),
    )
}

fn handle_config(ctx: &Context, command: ConfigCommand) -> Result<(), PortalError> {
    match command {
        ConfigCommand::Init => {
            if ctx.config_path.exists() {
                return output(ctx, json!({"path": ctx.config_path, "created": false}));
            }
            ensure_parent(&ctx.config_path)?;
            fs::write(&ctx.config_path, DEFAULT_CONFIG_YAML)?;
            output(ctx, json!({"path": ctx.config_path, "created": true}))
        }
        ConfigCommand::Show => {
            let cfg = load_config(&ctx.config_path)?;
            if ctx.json {
                return output(ctx, serde_json::to_value(&cfg)?);
            }
            print!("{}", serde_yaml::to_string(&cfg)?);
            Ok(())
        }
        ConfigCommand::Validate => {
            if !ctx.config_path.exists() {
                return Err(PortalError::Config(format!(
                    "config file not found: {}",
                    ctx.config_path.display()
                )));
            }
            let content = fs::read_to_string(&ctx.config_path)?;
            read_config_from_str(&content)?;
            output(ctx, json!({"path": ctx.config_path, "valid": true}))
        }
    }
}

fn dir_writable(path: &std::path::Path) -> bool {
    fs::create_dir_all(path)
        .and_then(|_| {
            let probe = path.join(".ldportal_write_test");
            fs::write(&probe, b"ok")?;
            fs::remove_file(&probe)
        })
        .is_ok()
}

fn handle_doctor(ctx: &Context) -> Result<(), PortalError> {
    let portal = load_portal(ctx)?;
    let mut checks = BTreeMap::new();
    let shell_ok = ShellLauncher::from_config(&portal.launcher)
        .shell()
        .is_file();
    checks.insert("shell".to_string(), shell_ok);
    checks.insert(
        "browser_opener".to_string(),
        browser::resolve_opener(&portal.browser).is_some(),
    );
    checks.insert("apps_file".to_string(), portal.apps_file.is_file());
    checks.insert("docs_dir".to_string(), portal.docs_dir.is_dir());
    let web_ok = dir_writable(&portal.web_dir);
    checks.insert("web_dir_writable".to_string(), web_ok);
    checks.insert("loopback_bind".to_string(), portal.is_loopback());

    let ok = shell_ok && web_ok;
    let error = if ok {
        None
    } else if !shell_ok {
        Some(format!("shell not found: {}", portal.launcher.shell))
    } else {
        Some(format!(
            "served root is not writable: {}",
            portal.web_dir.display()
        ))
    };

    if ctx.json {
        let payload = JsonResult {
            ok,
            result: Some(json!({ "checks": checks })),
            error,
        };
        print_json(&payload)?;
        return Ok(());
    }

    for (name, passed) in &checks {
        println!("{name}: {}", if *passed { "ok" } else { "missing" });
    }
    match error {
        Some(message) => Err(PortalError::Process(message)),
        None => Ok(()),
    }
}

fn output(ctx: &Context, payload: serde_json::Value) -> Result<(), PortalError> {
    if ctx.json {
        let wrapper = JsonResult {
            ok: true,
            result: Some(payload),
            error: None,
        };
        print_json(&wrapper)?;
    } else {
        println!("{}", payload);
    }
    Ok(())
}

fn print_json<T: Serialize>(payload: &T) -> Result<(), PortalError> {
    let text = serde_json::to_string_pretty(payload)?;
    println!("{}", text);
    Ok(())
}
