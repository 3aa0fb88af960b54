use std::cmp;
use std::error::Error;
use std::path::PathBuf;

use atty::Stream;
use clap::{Parser, Subcommand, ValueEnum};
use medsearch_rs::format::{FormattedMedicine, rupees};
use medsearch_rs::query::{Alternative, CheaperAlternative, ScoredMedicine};
use medsearch_rs::{MedicineIndex, PageQuery, SearchConfig, load_catalog_or_empty};
use once_cell::unsync::Lazy;
use serde::Serialize;
use termimad::{FmtText, MadSkin, terminal_size};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "medsearch-rs",
    about = "Search a medicine catalog by name, composition, price and more",
    version
)]
pub struct Cli {
    /// Emit JSON instead of human-readable tables.
    #[arg(long, global = true)]
    json: bool,

    /// Catalog file: a JSON array of records, optionally `.zst` compressed.
    #[arg(
        long,
        global = true,
        env = "MEDSEARCH_CATALOG",
        default_value = "medicines.json"
    )]
    catalog: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Look up a medicine by name, falling back to the closest name.
    Get {
        name: String,
        /// Attach cheaper substitutes with overlapping ingredients.
        #[arg(long)]
        alternatives: bool,
    },
    /// Case-insensitive substring search over every field.
    Search {
        query: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Rank names by similarity to a partial name.
    Fuzzy {
        /// At least three characters.
        partial: String,
        #[arg(short, long)]
        threshold: Option<f64>,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Find medicines by composition or ingredient.
    Composition {
        ingredient: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// List medicines priced within an inclusive range, cheapest first.
    Price {
        min: f64,
        max: f64,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Filter by manufacturer (exact, then partial match).
    Manufacturer {
        name: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Filter by prescription requirement.
    Prescription {
        #[arg(value_enum)]
        requirement: Requirement,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Medicines sharing ingredients with a reference medicine.
    Similar {
        name: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Price-aware substitutes for a reference medicine.
    Alternatives {
        name: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Combined filters with pagination.
    Page {
        #[arg(long, default_value = "")]
        query: String,
        #[arg(long, default_value = "")]
        manufacturer: String,
        #[arg(long, default_value_t = 0.0)]
        min_price: f64,
        #[arg(long)]
        max_price: Option<f64>,
        #[arg(long, value_enum)]
        prescription: Option<Requirement>,
        #[arg(long, default_value = "")]
        ingredient: String,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long)]
        page_size: Option<usize>,
    },
    /// Break a composition string into structured ingredients.
    Analyze { composition: String },
    /// Count medicines by composition with price and manufacturer breakdowns.
    Count {
        composition: String,
        /// Match the whole composition string exactly.
        #[arg(long)]
        exact: bool,
    },
    /// Group medicines by their primary ingredient.
    Categories {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// List every manufacturer with its medicine count.
    Manufacturers,
    /// Catalog-wide statistics.
    Stats,
    /// List medicine names that start with the provided prefix.
    Prefix {
        prefix: String,
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
    /// Serve the JSON API.
    #[cfg(feature = "web")]
    Serve {
        #[arg(long, default_value = "127.0.0.1:8001")]
        addr: std::net::SocketAddr,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Requirement {
    Required,
    NotRequired,
}

impl Requirement {
    fn is_required(self) -> bool {
        matches!(self, Requirement::Required)
    }
}

pub fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_tracing(&cli.command);
    execute(cli)
}

fn execute(cli: Cli) -> Result<(), Box<dyn Error>> {
    let defaults = SearchConfig::default();
    let as_json = cli.json;

    let catalog = &cli.catalog;
    let index = Lazy::new(|| MedicineIndex::build(load_catalog_or_empty(catalog)));
    match cli.command {
        #[cfg(feature = "web")]
        Command::Serve { addr } => handle_serve(addr, catalog.clone()),
        Command::Get { name, alternatives } => {
            let lookup = index.get_medicine_by_name(&name, alternatives)?;
            if as_json {
                return print_json(&lookup);
            }
            if let Some(note) = &lookup.note {
                println!("{note}");
            }
            print_medicine_detail(&lookup.medicine);
            if let Some(cheaper) = &lookup.cheaper_alternatives {
                println!("\nCheaper alternatives:");
                print_savings_table(cheaper);
            }
            if let Some(loose) = &lookup.similar_composition_alternatives {
                println!("\nSimilar-composition alternatives:");
                print_savings_table(loose);
            }
            Ok(())
        }
        Command::Search { query, limit } => {
            let limit = limit.unwrap_or(defaults.search_limit);
            let results = index.search_medicines(&query, cmp::max(1, limit))?;
            print_medicines(&results, as_json)
        }
        Command::Fuzzy {
            partial,
            threshold,
            limit,
        } => {
            let threshold = threshold.unwrap_or(defaults.fuzzy_threshold);
            let limit = limit.unwrap_or(defaults.fuzzy_limit);
            let results = index.fuzzy_search_by_name(&partial, threshold, cmp::max(1, limit))?;
            print_scored(&results, as_json)
        }
        Command::Composition { ingredient, limit } => {
            let limit = limit.unwrap_or(defaults.composition_limit);
            let found = index.search_by_composition(&ingredient, cmp::max(1, limit))?;
            if as_json {
                return print_json(&found);
            }
            if let Some(note) = &found.note {
                println!("{note}");
            }
            print_medicine_table(&found.matches);
            Ok(())
        }
        Command::Price { min, max, limit } => {
            let limit = limit.unwrap_or(defaults.price_limit);
            let results = index.filter_by_price_range(min, max, cmp::max(1, limit))?;
            print_medicines(&results, as_json)
        }
        Command::Manufacturer { name, limit } => {
            let limit = limit.unwrap_or(defaults.manufacturer_limit);
            let results = index.filter_by_manufacturer(&name, cmp::max(1, limit))?;
            print_medicines(&results, as_json)
        }
        Command::Prescription { requirement, limit } => {
            let limit = limit.unwrap_or(defaults.prescription_limit);
            let results = index
                .filter_by_prescription_requirement(requirement.is_required(), cmp::max(1, limit))?;
            print_medicines(&results, as_json)
        }
        Command::Similar { name, limit } => {
            let limit = limit.unwrap_or(defaults.similar_limit);
            let similar = index.find_similar_medicines(&name, cmp::max(1, limit))?;
            if as_json {
                return print_json(&similar);
            }
            print_reference_header(similar.note.as_deref(), &similar.reference_medicine);
            match &similar.message {
                Some(message) => println!("{message}"),
                None => print_scored_table(&similar.similar_medicines),
            }
            Ok(())
        }
        Command::Alternatives { name, limit } => {
            let limit = limit.unwrap_or(defaults.suggestion_limit);
            let suggestions = index.suggest_alternatives(&name, cmp::max(1, limit))?;
            if as_json {
                return print_json(&suggestions);
            }
            print_reference_header(suggestions.note.as_deref(), &suggestions.reference_medicine);
            match &suggestions.message {
                Some(message) => println!("{message}"),
                None => print_alternatives_table(&suggestions.alternatives),
            }
            Ok(())
        }
        Command::Page {
            query,
            manufacturer,
            min_price,
            max_price,
            prescription,
            ingredient,
            page,
            page_size,
        } => {
            let request = PageQuery {
                query,
                manufacturer,
                min_price,
                max_price: max_price.unwrap_or(f64::INFINITY),
                prescription_required: prescription.map(Requirement::is_required),
                ingredient,
                page,
                page_size: page_size.unwrap_or(defaults.page_size),
            };
            let page = index.paginated_search(&request);
            if as_json {
                return print_json(&page);
            }
            println!(
                "Page {} of {} ({} results)",
                page.meta.page, page.meta.total_pages, page.meta.total_results
            );
            print_medicine_table(&page.results);
            Ok(())
        }
        Command::Analyze { composition } => {
            let analysis = index.analyze_composition(&composition)?;
            if as_json {
                return print_json(&analysis);
            }
            let mut body = String::new();
            for ingredient in &analysis.ingredients {
                body.push_str(&format!("* **{}**", ingredient.name));
                if let Some(dosage) = &ingredient.dosage {
                    body.push_str(&format!(" `{dosage}`"));
                }
                body.push('\n');
            }
            render_markdown_block("Ingredients", &body);
            if let Some(same) = &analysis.medicines_with_this_composition {
                println!("\nMedicines with this composition:");
                print_medicine_table(same);
            }
            Ok(())
        }
        Command::Count { composition, exact } => {
            let count = index.count_medicines_by_composition(&composition, exact)?;
            if as_json {
                return print_json(&count);
            }
            println!(
                "{} medicines from {} manufacturers",
                count.total_medicines_found, count.total_manufacturers
            );
            let prices = &count.price_statistics;
            if let (Some(min), Some(max), Some(avg)) =
                (&prices.min_price, &prices.max_price, &prices.avg_price)
            {
                println!("Price: min {min}, max {max}, avg {avg}");
            }
            print_medicine_table(&count.medicines);
            Ok(())
        }
        Command::Categories { limit } => {
            let limit = limit.unwrap_or(defaults.max_categories);
            let categories = index.categorize_medicines(cmp::max(1, limit));
            if as_json {
                return print_json(&categories);
            }
            let rows: Vec<(String, String)> = categories
                .iter()
                .map(|category| (category.category.clone(), category.medicine_count.to_string()))
                .collect();
            print_two_column_table(("CATEGORY", "MEDICINES"), &rows);
            Ok(())
        }
        Command::Manufacturers => {
            let manufacturers = index.get_all_manufacturers();
            if as_json {
                return print_json(&manufacturers);
            }
            let rows: Vec<(String, String)> = manufacturers
                .iter()
                .map(|entry| (entry.name.clone(), entry.medicine_count.to_string()))
                .collect();
            print_two_column_table(("MANUFACTURER", "MEDICINES"), &rows);
            Ok(())
        }
        Command::Stats => {
            let stats = index.get_medicine_statistics();
            if as_json {
                return print_json(&stats);
            }
            let mut body = format!(
                "* Total medicines: **{}**\n* Prescription: **{}**\n* Over-the-counter: **{}**\n* Unknown status: **{}**\n",
                stats.total_medicines,
                stats.prescription_count,
                stats.otc_count,
                stats.unknown_prescription_status
            );
            let distribution = &stats.price_distribution;
            if let (Some(min), Some(max), Some(avg)) = (
                &distribution.min_price,
                &distribution.max_price,
                &distribution.avg_price,
            ) {
                body.push_str(&format!("* Price: min {min}, max {max}, avg {avg}\n"));
            }
            render_markdown_block("Catalog", &body);

            let top: Vec<(String, String)> = stats
                .manufacturer_counts
                .iter()
                .map(|(name, count)| (name.clone(), count.to_string()))
                .collect();
            println!("\nTop manufacturers:");
            print_two_column_table(("MANUFACTURER", "MEDICINES"), &top);

            let bands: Vec<(String, String)> = distribution
                .price_ranges
                .iter()
                .map(|band| (band.label(), band.count.to_string()))
                .collect();
            println!("\nPrice ranges:");
            print_two_column_table(("RANGE", "MEDICINES"), &bands);

            let ingredients: Vec<(String, String)> = stats
                .common_ingredients
                .iter()
                .map(|(name, count)| (name.clone(), count.to_string()))
                .collect();
            println!("\nCommon ingredients:");
            print_two_column_table(("INGREDIENT", "MEDICINES"), &ingredients);
            Ok(())
        }
        Command::Prefix { prefix, limit } => {
            let results = index.medicines_with_prefix(&prefix, cmp::max(1, limit))?;
            print_medicines(&results, as_json)
        }
    }
}

fn init_tracing(command: &Command) {
    #[cfg(feature = "web")]
    let default_level = if matches!(command, Command::Serve { .. }) {
        "info"
    } else {
        "warn"
    };
    #[cfg(not(feature = "web"))]
    let default_level = {
        let _ = command;
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(feature = "web")]
fn handle_serve(addr: std::net::SocketAddr, catalog: PathBuf) -> Result<(), Box<dyn Error>> {
    use medsearch_rs::web::{WebConfig, serve};

    let config = WebConfig {
        addr,
        catalog_path: Some(catalog),
        ..WebConfig::default()
    };
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve(config))?;
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_medicines(rows: &[FormattedMedicine<'_>], as_json: bool) -> Result<(), Box<dyn Error>> {
    if as_json {
        return print_json(&rows);
    }
    print_medicine_table(rows);
    Ok(())
}

fn print_scored(rows: &[ScoredMedicine<'_>], as_json: bool) -> Result<(), Box<dyn Error>> {
    if as_json {
        return print_json(&rows);
    }
    print_scored_table(rows);
    Ok(())
}

fn price_cell(medicine: &FormattedMedicine<'_>) -> String {
    medicine
        .price_inr
        .clone()
        .unwrap_or_else(|| "<unknown>".to_string())
}

fn prescription_cell(medicine: &FormattedMedicine<'_>) -> &'static str {
    match medicine.requires_prescription {
        Some(true) => "Rx",
        Some(false) => "OTC",
        None => "?",
    }
}

fn name_width<'a>(names: impl Iterator<Item = &'a str>) -> usize {
    names.map(str::len).max().unwrap_or(4).max("NAME".len())
}

fn print_medicine_table(rows: &[FormattedMedicine<'_>]) {
    if rows.is_empty() {
        println!("No medicines matched.");
        return;
    }
    let width = name_width(rows.iter().map(FormattedMedicine::name));
    println!("{:<width$}  {:>10}  {:<3}  {}", "NAME", "PRICE", "RX", "MANUFACTURER", width = width);
    println!("{:-<width$}  {:->10}  {:-<3}  {}", "", "", "", "------------", width = width);
    for medicine in rows {
        println!(
            "{:<width$}  {:>10}  {:<3}  {}",
            medicine.name(),
            price_cell(medicine),
            prescription_cell(medicine),
            medicine.record.manufacturer.as_deref().unwrap_or(""),
            width = width
        );
    }
}

fn print_scored_table(rows: &[ScoredMedicine<'_>]) {
    if rows.is_empty() {
        println!("No medicines matched.");
        return;
    }
    let width = name_width(rows.iter().map(|row| row.medicine.name()));
    println!("{:<width$}  {:>5}  {:>10}", "NAME", "SCORE", "PRICE", width = width);
    println!("{:-<width$}  {:->5}  {:->10}", "", "", "", width = width);
    for row in rows {
        println!(
            "{:<width$}  {:>5.2}  {:>10}",
            row.medicine.name(),
            row.score,
            price_cell(&row.medicine),
            width = width
        );
    }
}

fn print_savings_table(rows: &[CheaperAlternative<'_>]) {
    if rows.is_empty() {
        println!("None found.");
        return;
    }
    let width = name_width(rows.iter().map(|row| row.medicine.name()));
    println!(
        "{:<width$}  {:>10}  {:>10}  {:>7}  {:>5}",
        "NAME", "PRICE", "SAVES", "SAVES%", "SIM", width = width
    );
    println!("{:-<width$}  {:->10}  {:->10}  {:->7}  {:->5}", "", "", "", "", "", width = width);
    for row in rows {
        println!(
            "{:<width$}  {:>10}  {:>10}  {:>6.1}%  {:>5.2}",
            row.medicine.name(),
            price_cell(&row.medicine),
            rupees(row.price_savings),
            row.savings_percentage,
            row.similarity,
            width = width
        );
    }
}

fn print_alternatives_table(rows: &[Alternative<'_>]) {
    let width = name_width(rows.iter().map(|row| row.medicine.name()));
    println!(
        "{:<width$}  {:>5}  {:>10}  {}",
        "NAME", "SIM", "PRICE", "COMPARISON", width = width
    );
    println!("{:-<width$}  {:->5}  {:->10}  {}", "", "", "", "----------", width = width);
    for row in rows {
        let comparison = match row.price_difference_percentage {
            Some(percentage) => format!("{percentage:+.1}%"),
            None => rupees(row.absolute_price_difference),
        };
        println!(
            "{:<width$}  {:>5.2}  {:>10}  {}",
            row.medicine.name(),
            row.ingredient_similarity,
            price_cell(&row.medicine),
            comparison,
            width = width
        );
    }
}

fn print_two_column_table(headers: (&str, &str), rows: &[(String, String)]) {
    if rows.is_empty() {
        println!("Nothing to show.");
        return;
    }
    let width = rows
        .iter()
        .map(|(label, _)| label.chars().count())
        .max()
        .unwrap_or(0)
        .max(headers.0.len());
    println!("{:<width$}  {}", headers.0, headers.1, width = width);
    println!("{:-<width$}  {:-<w2$}", "", "", width = width, w2 = headers.1.len());
    for (label, value) in rows {
        println!("{:<width$}  {}", label, value, width = width);
    }
}

fn print_reference_header(note: Option<&str>, reference: &FormattedMedicine<'_>) {
    if let Some(note) = note {
        println!("{note}");
    }
    println!(
        "Reference: {} ({})",
        reference.name(),
        reference
            .record
            .composition
            .as_deref()
            .unwrap_or("<no composition>")
    );
}

fn print_medicine_detail(medicine: &FormattedMedicine<'_>) {
    println!("Medicine: {}", medicine.name());
    if let Some(manufacturer) = medicine.record.manufacturer.as_deref() {
        println!("Manufacturer: {manufacturer}");
    }
    if let Some(price) = &medicine.price_inr {
        let tier = medicine
            .price_category
            .map(|tier| format!(" ({tier})"))
            .unwrap_or_default();
        println!("Price: {price}{tier}");
    }
    if let Some(label) = medicine.prescription_type {
        println!("Prescription: {label}");
    }
    if let Some(composition) = medicine.record.composition.as_deref() {
        render_markdown_block("Composition", composition);
    }
}

fn stdout_is_tty() -> bool {
    atty::is(Stream::Stdout)
}

fn markdown_width() -> usize {
    let (width, _) = terminal_size();
    width.max(60) as usize
}

fn render_markdown_block(title: &str, body: &str) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return;
    }
    println!("\n{title}:");
    if stdout_is_tty() {
        let skin = MadSkin::default();
        let formatted = FmtText::from(&skin, trimmed, Some(markdown_width()));
        println!("{formatted}");
    } else {
        println!("{trimmed}");
    }
}
