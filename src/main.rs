use std::{process, sync::Arc};

use clap::{Parser, Subcommand, ValueHint};
use log::{error, info, LevelFilter};

use cloz::{
    config::{Config, Connection},
    error::Result,
    gateway::{Gateway, HttpAuthConnector},
    http::Client as HttpClient,
    lifecycle::{Navigator, Screen, SessionEvent, SessionManager},
    protocol::{user::ProfileUpdate, Category, NewOutfit, NewWardrobeItem, SignupRequest},
    state::SessionState,
    store::FileStore,
};

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Connection settings file
    ///
    /// Optional TOML file overriding the API endpoint and the location of
    /// the credential record.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("connection.toml"))]
    connection_file: String,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Sign in with a username and password
    Login {
        username: String,

        /// Account password
        #[arg(long, env = "CLOZ_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Register a new account
    Signup {
        username: String,

        /// Account password
        #[arg(long, env = "CLOZ_PASSWORD", hide_env_values = true)]
        password: String,

        /// Contact address; receives the verification code
        #[arg(long)]
        email: String,

        /// Display name
        #[arg(long)]
        name: Option<String>,
    },

    /// Submit the emailed verification code
    Verify { username: String, code: String },

    /// Show session and account status
    Status,

    /// Sign out
    Logout,

    /// Wardrobe items
    #[command(subcommand)]
    Items(ItemsCommand),

    /// Composed outfits
    #[command(subcommand)]
    Outfits(OutfitsCommand),

    /// Browse user accounts (admin only)
    Users,

    /// Show the profile, or update it when a flag is given
    Profile {
        /// New display name
        #[arg(long)]
        name: Option<String>,

        /// New contact address
        #[arg(long)]
        email: Option<String>,

        /// Dark-mode preference
        #[arg(long)]
        dark_mode: Option<bool>,
    },
}

#[derive(Clone, Debug, Subcommand)]
enum ItemsCommand {
    /// List the wardrobe
    List,

    /// Catalogue a new item
    Add {
        /// Category: upper, bottom, shoes or accessory
        category: Category,

        /// Display name
        name: String,

        /// Dominant color
        #[arg(long)]
        color: Option<String>,

        /// Brand
        #[arg(long)]
        brand: Option<String>,
    },

    /// Remove an item
    Remove { id: u64 },
}

#[derive(Clone, Debug, Subcommand)]
enum OutfitsCommand {
    /// List composed outfits
    List,

    /// Compose an outfit from item ids
    Compose {
        /// Display name
        name: String,

        /// Item ids making up the outfit
        #[arg(required = true)]
        items: Vec<u64>,
    },

    /// Remove an outfit
    Remove { id: u64 },
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
        logger.filter_module("cloz", level);
    }

    logger.init();
}

/// The screen a command starts on, which decides whether a session
/// invalidation may redirect to the login screen.
fn initial_screen(command: &Command, logged_in: bool) -> Screen {
    match command {
        Command::Login { .. } => Screen::Login,
        Command::Signup { .. } => Screen::Signup,
        Command::Verify { .. } => Screen::Verification,
        _ if logged_in => Screen::Wardrobe,
        _ => Screen::Login,
    }
}

async fn run(args: Args) -> Result<()> {
    let connection = Connection::load(args.connection_file.as_ref())?;
    let config = Config::new(connection.api_url());

    let store = Arc::new(FileStore::open(connection.credentials_file()).await?);
    let state = SessionState::initialize(store).await?;

    let (navigator, mut events) =
        Navigator::new(initial_screen(&args.command, state.is_logged_in()));

    let http_client = Arc::new(HttpClient::new(&config)?);
    let connector = Arc::new(HttpAuthConnector::new(Arc::clone(&http_client), &config));
    let manager = SessionManager::new(state.clone(), connector, navigator.clone());
    let gateway = Gateway::new(
        http_client,
        &config,
        state.clone(),
        manager.coordinator().clone(),
    );

    manager.validate_on_startup().await;

    match args.command {
        Command::Login { username, password } => {
            let response = gateway.login(&username, &password).await?;
            if let Some(grant) = response.grant {
                manager.complete_authentication(grant).await;
                println!("signed in as {username}");
            } else if response.mfa_required {
                navigator.set_screen(Screen::Verification);
                println!("verification code sent; run `cloz verify {username} <code>`");
            } else {
                warn_no_grant();
            }
        }

        Command::Signup {
            username,
            password,
            email,
            name,
        } => {
            gateway
                .signup(&SignupRequest {
                    username: username.clone(),
                    password,
                    email,
                    name,
                })
                .await?;
            println!("account created; run `cloz verify {username} <code>` with the emailed code");
        }

        Command::Verify { username, code } => {
            let grant = gateway.verify(&username, &code).await?;
            manager.complete_authentication(grant).await;
            println!("signed in as {username}");
        }

        Command::Status => {
            let valid = manager.validate_session_on_resume().await;
            match manager.state().user() {
                Some(user) => {
                    println!("signed in as {} ({})", user.username, user.role);
                    println!("session usable: {valid}");
                }
                None => println!("signed out"),
            }
        }

        Command::Logout => {
            manager.logout().await;
            println!("signed out");
        }

        Command::Items(items) => match items {
            ItemsCommand::List => {
                for item in gateway.list_items().await? {
                    let color = item.color.as_deref().unwrap_or("-");
                    let brand = item.brand.as_deref().unwrap_or("-");
                    println!("{:>6}  {:<9}  {:<24}  {color}  {brand}", item.id, item.category.to_string(), item.name);
                }
            }
            ItemsCommand::Add {
                category,
                name,
                color,
                brand,
            } => {
                let item = gateway
                    .add_item(&NewWardrobeItem {
                        category,
                        name,
                        color,
                        brand,
                    })
                    .await?;
                println!("catalogued item {}", item.id);
            }
            ItemsCommand::Remove { id } => {
                gateway.delete_item(id).await?;
                println!("removed item {id}");
            }
        },

        Command::Outfits(outfits) => match outfits {
            OutfitsCommand::List => {
                for outfit in gateway.list_outfits().await? {
                    let items = outfit
                        .item_ids
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ");
                    println!("{:>6}  {:<24}  [{items}]", outfit.id, outfit.name);
                }
            }
            OutfitsCommand::Compose { name, items } => {
                let outfit = gateway
                    .compose_outfit(&NewOutfit {
                        name,
                        item_ids: items,
                    })
                    .await?;
                println!("composed outfit {}", outfit.id);
            }
            OutfitsCommand::Remove { id } => {
                gateway.delete_outfit(id).await?;
                println!("removed outfit {id}");
            }
        },

        Command::Users => {
            for user in gateway.list_users().await? {
                println!("{:<24}  {}", user.username, user.role);
            }
        }

        Command::Profile {
            name,
            email,
            dark_mode,
        } => {
            let update = ProfileUpdate {
                name,
                email,
                gender: None,
                dark_mode,
            };
            let user = if update == ProfileUpdate::default() {
                gateway.profile().await?
            } else {
                let user = gateway.update_profile(&update).await?;
                // Keep the cached profile current.
                manager.state().set_user(user.clone()).await;
                user
            };

            println!("username:  {}", user.username);
            println!("role:      {}", user.role);
            println!("name:      {}", user.name.as_deref().unwrap_or("-"));
            println!("email:     {}", user.email.as_deref().unwrap_or("-"));
            println!(
                "dark mode: {}",
                user.dark_mode.map_or("-".to_string(), |on| on.to_string())
            );
        }
    }

    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::RedirectToLogin => {
                info!("session ended; sign in again with `cloz login <username>`");
            }
        }
    }

    Ok(())
}

fn warn_no_grant() {
    error!("server issued neither credentials nor a verification challenge");
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logger(&args);

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
