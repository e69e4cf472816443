use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use topic_sweep::{
    AppConfig, CancellationToken, LabeledImages, ModelSelector, SearchResult, SweepRange,
};

#[derive(Parser, Debug)]
#[command(version, about = "Pick the most coherent topic count for a set of image labels", long_about = None)]
struct Args {
    /// JSON label file: {"image path": ["label", ...]} or [["label", ...], ...]
    path: PathBuf,
    #[clap(short, long, help = "JSON config file; missing fields keep their defaults")]
    config: Option<PathBuf>,
    #[clap(long)]
    start: Option<usize>,
    #[clap(long)]
    limit: Option<usize>,
    #[clap(long)]
    step: Option<usize>,
    #[clap(long)]
    seed: Option<u64>,
    #[clap(long)]
    passes: Option<usize>,
    #[clap(short, long, help = "Fit candidate topic counts in parallel")]
    parallel: bool,
    #[clap(long, help = "Print the search result as JSON instead of a summary")]
    json: bool,
    #[clap(long, default_value_t = 10, help = "Words shown per topic")]
    top_words: usize,
}

fn main() {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("topic_sweep=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let config = load_config(args)?;
    let labeled = LabeledImages::from_json_file(&args.path)
        .with_context(|| format!("reading labels from {}", args.path.display()))?;

    let range = SweepRange::from(&config.sweep);
    let selector = ModelSelector::new(&config);
    let result = selector.sweep(&labeled.corpus, &range, &CancellationToken::new())?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result.report(args.top_words))?);
    } else {
        print_summary(&result, &labeled, args.top_words);
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_json_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => AppConfig::default(),
    }
    .apply_env()?;

    if let Some(start) = args.start {
        config.sweep.start = start;
    }
    if let Some(limit) = args.limit {
        config.sweep.limit = limit;
    }
    if let Some(step) = args.step {
        config.sweep.step = step;
    }
    if let Some(seed) = args.seed {
        config.lda.seed = seed;
    }
    if let Some(passes) = args.passes {
        config.lda.passes = passes;
    }
    config.sweep.parallel |= args.parallel;

    config.validate()?;
    Ok(config)
}

fn print_summary(result: &SearchResult, labeled: &LabeledImages, top_words: usize) {
    println!("Topic count sweep ({})", Utc::now().format("%Y-%m-%d %H:%M:%S UTC"));
    println!("   Images: {}", labeled.corpus.len());
    println!();
    println!("   {:>4}  {:>10}  {:>6}", "K", "coherence", "passes");
    for candidate in &result.candidates {
        let marker = if Some(candidate.k) == result.optimal_k { "✓" } else { " " };
        match (&candidate.model, &candidate.failure) {
            (Some(model), _) => println!(
                " {} {:>4}  {:>10.4}  {:>6}",
                marker, candidate.k, candidate.score, model.provenance.passes_run
            ),
            (None, Some(failure)) => println!(
                " {} {:>4}  {:>10}  failed: {}",
                marker, candidate.k, "-", failure.reason
            ),
            (None, None) => {}
        }
    }
    if result.cancelled {
        println!("   (sweep cancelled before all candidates ran)");
    }

    let Some(model) = result.best_model() else {
        println!("No topic count could be selected");
        return;
    };

    let vocabulary = model.vocabulary();
    let common: Vec<String> = vocabulary
        .most_frequent(top_words)
        .into_iter()
        .filter_map(|id| {
            vocabulary.token(id).map(|label| {
                format!(
                    "{} ({}/{})",
                    label,
                    vocabulary.document_frequency(id),
                    vocabulary.collection_frequency(id)
                )
            })
        })
        .collect();
    println!();
    println!("   Distinct labels: {}", vocabulary.len());
    println!("   Most common (images/occurrences): {}", common.join(", "));

    println!();
    println!("Optimal number of topics: {}", model.num_topics());
    for topic in model.topics(top_words) {
        println!(
            "   Topic {:<2} coherence {:.3}: {}",
            topic.id,
            topic.coherence_score.unwrap_or(0.0),
            model.format_topic(topic.id, top_words)
        );
        let images: Vec<&str> = topic
            .documents
            .iter()
            .take(5)
            .filter_map(|&doc| labeled.images.get(doc).map(String::as_str))
            .collect();
        if !images.is_empty() {
            println!("      e.g. {}", images.join(", "));
        }
    }
}
