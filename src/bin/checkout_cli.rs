use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use storefront_checkout::{
    clock::{Clock, FixedClock, SystemClock},
    config::{self, AppConfig},
    db,
    events::{self, Event, EventHandler},
    repositories::{
        InMemoryStore, SeaOrmCheckoutLookup, SeaOrmDiscountRepository, SeaOrmOrderRepository,
    },
    services::{
        commerce::{CheckoutRequest, CheckoutService, CheckoutSettings},
        discounts::{
            model::{CartSnapshot, DiscountType, UserContext},
            Discount, DiscountQuote, DiscountRule, DiscountService,
        },
        payments::StripePaymentGateway,
    },
};
use tracing::info;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Quote(args) => {
            config::init_tracing("warn", false);
            let quote = handle_quote(args).await?;
            render(&quote, cli.json)?;
        }
        Commands::SyncSchema => {
            let cfg = load()?;
            let pool = db::establish_connection_from_app_config(&cfg).await?;
            db::sync_schema(&pool).await?;
            println!("Schema synchronized");
        }
        Commands::Checkout(args) => {
            let cfg = load()?;
            handle_checkout(&cfg, args, cli.json).await?;
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "checkout-cli", about = "Discount quotes and checkout runs", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Price a cart fixture against discount codes, without a database
    Quote(QuoteArgs),
    /// Create any missing tables in the configured database
    SyncSchema,
    /// Run a checkout against the configured database and payment provider
    Checkout(CheckoutArgs),
}

#[derive(Args)]
struct QuoteArgs {
    /// JSON fixture with `discounts`, `cart` and `user`
    #[arg(long)]
    fixture: PathBuf,
    /// Discount code; repeat for several
    #[arg(long = "code")]
    codes: Vec<String>,
    /// Evaluate as of this RFC 3339 instant instead of now
    #[arg(long)]
    at: Option<DateTime<Utc>>,
}

#[derive(Args)]
struct CheckoutArgs {
    #[arg(long)]
    user: Uuid,
    #[arg(long)]
    cart: Uuid,
    #[arg(long)]
    address: Option<Uuid>,
    #[arg(long)]
    payment_method: String,
    #[arg(long = "code")]
    codes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct QuoteFixture {
    discounts: Vec<FixtureDiscount>,
    cart: CartSnapshot,
    user: UserContext,
}

#[derive(Debug, Deserialize)]
struct FixtureDiscount {
    #[serde(default = "Uuid::new_v4")]
    id: Uuid,
    code: String,
    discount_type: DiscountType,
    value: Decimal,
    starts_at: DateTime<Utc>,
    #[serde(default)]
    ends_at: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    stackable: bool,
    #[serde(default)]
    usage_limit: Option<u32>,
    #[serde(default)]
    per_user_limit: Option<u32>,
    #[serde(default)]
    times_used: u32,
    #[serde(default)]
    rules: Vec<FixtureRule>,
}

#[derive(Debug, Deserialize)]
struct FixtureRule {
    rule_type: String,
    payload: serde_json::Value,
}

fn default_true() -> bool {
    true
}

impl From<FixtureDiscount> for Discount {
    fn from(fixture: FixtureDiscount) -> Self {
        Discount {
            id: fixture.id,
            code: fixture.code,
            discount_type: fixture.discount_type,
            value: fixture.value,
            starts_at: fixture.starts_at,
            ends_at: fixture.ends_at,
            stackable: fixture.stackable,
            usage_limit: fixture.usage_limit,
            per_user_limit: fixture.per_user_limit,
            times_used: fixture.times_used,
            is_active: true,
            rules: fixture
                .rules
                .into_iter()
                .map(|r| DiscountRule::from_stored(Uuid::new_v4(), &r.rule_type, &r.payload))
                .collect(),
        }
    }
}

async fn handle_quote(args: QuoteArgs) -> Result<DiscountQuote> {
    let raw = fs::read_to_string(&args.fixture)
        .with_context(|| format!("failed to read fixture {}", args.fixture.display()))?;
    let fixture: QuoteFixture = serde_json::from_str(&raw).context("fixture is not valid JSON")?;

    let store = InMemoryStore::new();
    for discount in fixture.discounts {
        store.insert_discount(discount.into()).await;
    }

    let clock: Arc<dyn Clock> = match args.at {
        Some(at) => Arc::new(FixedClock::new(at)),
        None => Arc::new(SystemClock),
    };
    let service = DiscountService::new(Arc::new(store), clock);

    service
        .quote(&fixture.cart, &fixture.user, &args.codes)
        .await
        .context("discount evaluation failed")
}

struct LogEvents;

#[async_trait]
impl EventHandler for LogEvents {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        info!(?event, "checkout event");
        Ok(())
    }
}

async fn handle_checkout(cfg: &AppConfig, args: CheckoutArgs, json: bool) -> Result<()> {
    let pool = Arc::new(db::establish_connection_from_app_config(cfg).await?);
    let (sender, rx) = events::channel(cfg.event_channel_capacity);
    let handlers: Vec<Arc<dyn EventHandler>> = vec![Arc::new(LogEvents)];
    let events_task = tokio::spawn(events::process_events(rx, handlers));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let gateway = StripePaymentGateway::from_config(&cfg.payment)?;
    let service = CheckoutService::new(
        Arc::new(SeaOrmCheckoutLookup::new(pool.clone())),
        DiscountService::new(Arc::new(SeaOrmDiscountRepository::new(pool.clone())), clock.clone()),
        Arc::new(SeaOrmOrderRepository::new(pool)),
        Arc::new(gateway),
        clock,
        Arc::new(sender),
        CheckoutSettings::from_config(cfg),
    );

    let created = service
        .checkout(CheckoutRequest {
            user_id: args.user,
            cart_id: args.cart,
            address_id: args.address,
            payment_method_id: args.payment_method,
            discount_codes: args.codes,
        })
        .await?;

    render(&created, json)?;

    // Dropping the service closes the channel and ends the event loop.
    drop(service);
    events_task.await?;
    Ok(())
}

fn load() -> Result<AppConfig> {
    let cfg = config::load_config()?;
    config::init_tracing(cfg.log_level(), cfg.log_json);
    Ok(cfg)
}

fn render<T: Serialize + std::fmt::Debug>(value: &T, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{:#?}", value);
    }
    Ok(())
}
