use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use rust_decimal::Decimal;
use serde::Serialize;
use storefront_api::{
    config,
    db::{self, DbPool},
    services::{
        products::{NewProduct, ProductService},
        users::{UserLookup, UserProfile, UserService},
    },
};
use tracing::info;
use validator::Validate;

const UNSPLASH_PARAMS: &str = "?auto=format&fit=crop&w=400&q=80";

/// name, description, price (INR), category, unsplash photo id
const CATALOG: &[(&str, &str, i64, &str, &str)] = &[
    ("Mango Pickle", "Traditional raw mango pickle with aromatic spices. A perfect blend of tangy and spicy flavors.", 250, "pickles", "photo-1465146344425-f00d5f5c8f07"),
    ("Mixed Vegetable Pickle", "A delightful mix of seasonal vegetables pickled with our special spice blend.", 200, "pickles", "photo-1618160702438-9b02ab6515c9"),
    ("Lime Pickle", "Zesty lime pickle that adds a burst of flavor to any meal. Made with fresh limes and traditional spices.", 180, "pickles", "photo-1582562124811-c09040d0a901"),
    ("Chicken Biryani", "Aromatic basmati rice layered with tender chicken pieces and traditional spices.", 350, "biryanis", "photo-1563379091339-03246963d96c"),
    ("Mutton Biryani", "Rich and flavorful mutton biryani with perfectly cooked rice and succulent meat.", 450, "biryanis", "photo-1563379091339-03246963d96c"),
    ("Veg Biryani", "Fragrant vegetable biryani with seasonal vegetables and aromatic spices.", 280, "biryanis", "photo-1563379091339-03246963d96c"),
    ("Butter Chicken", "Creamy and rich butter chicken curry made with tender chicken pieces.", 320, "non-veg", "photo-1565557623262-b51c2513a641"),
    ("Paneer Butter Masala", "Creamy tomato-based curry with soft paneer cubes in rich gravy.", 280, "veg", "photo-1631452180519-c014fe946bc7"),
    ("Dal Tadka", "Traditional yellow lentil curry tempered with aromatic spices.", 180, "veg", "photo-1546833999-b9f581a1996d"),
    ("Fish Curry", "Authentic fish curry with coconut milk and traditional coastal spices.", 380, "non-veg", "photo-1565299624946-b28f40a0ca4b"),
    ("Special Thali", "Complete meal with rice, dal, vegetables, curry, pickle, and dessert.", 450, "specials", "photo-1512058564366-18510be2db19"),
    ("Family Combo", "Perfect for 4 people - includes biryani, curry, dal, and pickles.", 1200, "specials", "photo-1512058564366-18510be2db19"),
    ("Green Chilli Pickle", "Spicy green chilli pickle with a perfect balance of heat and flavor.", 220, "pickles", "photo-1582562124811-c09040d0a901"),
    ("Garlic Pickle", "Aromatic garlic pickle with a strong, pungent flavor that enhances any meal.", 280, "pickles", "photo-1582562124811-c09040d0a901"),
    ("Veg Pulao", "Fragrant basmati rice cooked with mixed vegetables and aromatic spices.", 250, "biryanis", "photo-1563379091339-03246963d96c"),
];

#[derive(Parser)]
#[command(name = "storefront-cli", about = "Storefront maintenance: migrations, catalog seeding and admin grants", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON when available"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Insert the starter catalog; products that already exist by name are skipped
    SeedProducts,
    /// Add a single product
    AddProduct(AddProductArgs),
    /// Grant (or revoke) admin rights
    SetAdmin(SetAdminArgs),
}

#[derive(Args)]
struct AddProductArgs {
    #[arg(long)]
    name: String,
    #[arg(long, help = "Unit price in rupees, e.g. 249.50")]
    price: Decimal,
    #[arg(long)]
    category: String,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long, default_value = "", help = "Image URL")]
    image: String,
}

#[derive(Args)]
struct SetAdminArgs {
    #[arg(long, conflicts_with = "google_id", help = "Email of the user")]
    email: Option<String>,
    #[arg(long, help = "Google subject id of the user")]
    google_id: Option<String>,
    #[arg(long, action = ArgAction::SetTrue, help = "Remove admin rights instead of granting them")]
    revoke: bool,
}

#[derive(Serialize)]
struct SeedSummary {
    inserted: Vec<String>,
    skipped: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing(cfg.log_level(), cfg.log_json);
    let pool: Arc<DbPool> = Arc::new(
        db::establish_connection_from_app_config(&cfg)
            .await
            .context("failed to connect to the database")?,
    );

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&pool).await?;
            println!("Migrations applied");
        }
        Commands::SeedProducts => {
            let summary = seed_products(&ProductService::new(pool)).await?;
            if cli.json {
                print_json(&summary)?;
            } else {
                println!(
                    "Seeded {} products ({} already present)",
                    summary.inserted.len(),
                    summary.skipped.len()
                );
            }
        }
        Commands::AddProduct(args) => {
            let input = NewProduct {
                name: args.name,
                description: args.description,
                price: args.price,
                image: args.image,
                category: args.category,
            };
            input.validate().context("invalid product")?;
            let product = ProductService::new(pool).create(input).await?;
            if cli.json {
                print_json(&product)?;
            } else {
                println!("Created product {} ({})", product.name, product.id);
            }
        }
        Commands::SetAdmin(args) => {
            let lookup = match (args.email, args.google_id) {
                (Some(email), _) => UserLookup::Email(email),
                (None, Some(google_id)) => UserLookup::GoogleId(google_id),
                (None, None) => bail!("pass --email or --google-id"),
            };
            let user = UserService::new(pool).set_admin(lookup, !args.revoke).await?;
            if cli.json {
                print_json(&UserProfile::from(user))?;
            } else {
                println!(
                    "{} is {}an admin",
                    user.email,
                    if user.is_admin { "now " } else { "no longer " }
                );
            }
        }
    }

    Ok(())
}

async fn seed_products(products: &ProductService) -> Result<SeedSummary> {
    let mut summary = SeedSummary {
        inserted: Vec::new(),
        skipped: Vec::new(),
    };
    for (name, description, price, category, photo) in CATALOG {
        if products.find_by_name(name).await?.is_some() {
            summary.skipped.push(name.to_string());
            continue;
        }
        products
            .create(NewProduct {
                name: name.to_string(),
                description: description.to_string(),
                price: Decimal::from(*price),
                image: format!("https://images.unsplash.com/{}{}", photo, UNSPLASH_PARAMS),
                category: category.to_string(),
            })
            .await
            .with_context(|| format!("failed to insert {}", name))?;
        info!(product = name, "seeded product");
        summary.inserted.push(name.to_string());
    }
    Ok(summary)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
