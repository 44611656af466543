use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use solidgps::{
    build_client, entity, Authenticator, Config, ConfigFlow, ConfigStore, Coordinator, Endpoints,
    EntryConfig, JsonFileStore, LocationSnapshot, LoginResult, ManualSetup, UpdateError,
};

type Error = Box<dyn std::error::Error>;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long)]
    config: PathBuf,
    /// Override the vendor base url
    #[arg(long)]
    base_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Log in to the SolidGPS website and list the devices on the account
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
        #[arg(short, long)]
        table: bool,
    },
    /// Add a device using the account email and password
    Add {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
        /// The IMEI from the login command
        imei: String,
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Add a device using an auth code and tracking code
    AddManual {
        imei: String,
        #[arg(long)]
        auth_code: String,
        #[arg(long)]
        tracking_code: String,
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Replace the auth code and tracking code of a configured device
    Reauth {
        imei: String,
        #[arg(long)]
        auth_code: String,
        #[arg(long)]
        tracking_code: String,
    },
    /// Fetch the latest position of a configured device once
    Poll {
        imei: String,
        #[arg(short, long)]
        table: bool,
    },
    /// Poll a configured device on the configured interval and print changes
    Watch { imei: String },
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Error> {
    let endpoints = match &args.base_url {
        Some(url) => Endpoints::new(url)?,
        None => Endpoints::default(),
    };
    let store = Arc::new(JsonFileStore::new(&args.config));
    let flow = ConfigFlow::new(build_client()?, endpoints.clone());
    match args.command {
        Command::Login {
            email,
            password,
            table,
        } => {
            let login = flow
                .discover(&Authenticator::new(endpoints), &email, &password)
                .await?;
            print_devices(&login, table)?;
        }
        Command::Add {
            email,
            password,
            imei,
            name,
        } => {
            let mut config = store.load()?;
            let login = flow
                .discover(&Authenticator::new(endpoints), &email, &password)
                .await?;
            let entry = flow
                .setup_from_login(&config, &login, &imei, &email, &password, name)
                .await?;
            println!("added {} ({})", entry.title(), entry.imei());
            config.upsert(entry);
            store.save(&config)?;
        }
        Command::AddManual {
            imei,
            auth_code,
            tracking_code,
            name,
        } => {
            let mut config = store.load()?;
            let input = ManualSetup {
                imei,
                auth_code,
                tracking_code,
                device_name: name,
            };
            let entry = flow.setup_manual(&config, input).await?;
            println!("added {} ({})", entry.title(), entry.imei());
            config.upsert(entry);
            store.save(&config)?;
        }
        Command::Reauth {
            imei,
            auth_code,
            tracking_code,
        } => {
            let config = store.load()?;
            let entry = configured(&config, &imei)?;
            let updated = flow.reauth(entry, auth_code, tracking_code).await?;
            store.save_entry(&updated)?;
            println!("updated credentials for {}", updated.title());
        }
        Command::Poll { imei, table } => {
            let config = store.load()?;
            let entry = configured(&config, &imei)?.clone();
            let mut coordinator = Coordinator::new(build_client()?, endpoints, entry, store);
            let snapshot = coordinator.refresh().await?;
            if table {
                print_entities(&coordinator);
            } else {
                print_snapshot(snapshot.as_ref())?;
            }
        }
        Command::Watch { imei } => {
            let config = store.load()?;
            let entry = configured(&config, &imei)?.clone();
            watch(config.update_interval(), entry, endpoints, store).await?;
        }
    }
    Ok(())
}

fn configured<'a>(config: &'a Config, imei: &str) -> Result<&'a EntryConfig, Error> {
    config
        .entry(imei)
        .ok_or_else(|| format!("no configured device with IMEI {imei}").into())
}

async fn watch(
    period: std::time::Duration,
    entry: EntryConfig,
    endpoints: Endpoints,
    store: Arc<JsonFileStore>,
) -> Result<(), Error> {
    let mut coordinator = Coordinator::new(build_client()?, endpoints, entry, store);
    let mut events = coordinator.subscribe();
    let mut ticks = tokio::time::interval(period);
    loop {
        ticks.tick().await;
        match coordinator.refresh().await {
            Ok(snapshot) => print_snapshot(snapshot.as_ref())?,
            Err(UpdateError::Transient(e)) => log::warn!("{e}, retrying in {period:?}"),
            Err(e @ UpdateError::ReauthRequired(_)) => {
                return Err(format!("{e}\nrun `solidgps-cli reauth {}`", coordinator.imei()).into())
            }
        }
        while let Ok(event) = events.try_recv() {
            println!("{}", serde_json::to_string(&event)?);
        }
    }
}

fn print_devices(login: &LoginResult, table: bool) -> Result<(), Error> {
    if table {
        let mut t = comfy_table::Table::new();
        t.set_header(vec!["IMEI", "Nickname", "Device Type"]);
        for (imei, device) in &login.devices {
            t.add_row(vec![
                imei.as_str(),
                device.nickname.as_deref().unwrap_or(""),
                device.device_type.as_deref().unwrap_or("unknown"),
            ]);
        }
        println!("{t}");
    } else {
        println!("{}", serde_json::to_string(&login.devices)?);
    }
    Ok(())
}

fn print_snapshot(snapshot: Option<&LocationSnapshot>) -> Result<(), Error> {
    match snapshot {
        Some(snapshot) => println!("{}", serde_json::to_string(snapshot)?),
        None => println!("null"),
    }
    Ok(())
}

fn print_entities(coordinator: &Coordinator) {
    let mut t = comfy_table::Table::new();
    t.set_header(vec!["Entity", "State", "Attributes"]);
    for e in entity::entities_for(coordinator) {
        let state = e.state();
        t.add_row(vec![
            state.unique_id,
            state.state.to_string(),
            serde_json::Value::Object(state.attributes).to_string(),
        ]);
    }
    println!("{t}");
}
