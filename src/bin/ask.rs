use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use gridrag::settings::EmbedderArgs;
use gridrag::{IndexContext, IndexLayout, RetrievalEngine, RetrievedDocument};

#[path = "ask/providers/mod.rs"]
mod providers;

use providers::OpenAiChat;

#[derive(Parser, Debug)]
#[command(
    name = "gridrag-ask",
    about = "Answer questions about transmission lines from the local vector index"
)]
struct AskCli {
    /// Question to answer
    question: String,

    /// Directory holding published index generations
    #[arg(long, env = "GRIDRAG_INDEX_DIR", default_value = "gridrag-data/index")]
    index_dir: PathBuf,

    /// Number of documents retrieved as context
    #[arg(long, default_value_t = 3)]
    top_k: usize,

    #[command(flatten)]
    embedder: EmbedderArgs,

    /// Chat model used for the answer
    #[arg(long, env = "GRIDRAG_CHAT_MODEL", default_value = "gpt-4o-mini")]
    chat_model: String,

    /// Sampling temperature for the answer model
    #[arg(long, default_value_t = 0.2)]
    temperature: f32,

    /// Maximum tokens to request from the completion model
    #[arg(long, default_value_t = 400)]
    max_completion_tokens: usize,

    /// Only print the retrieved context (skip the chat call)
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

fn main() -> Result<()> {
    gridrag::telemetry::init_tracing_with_default("warn");
    let cli = AskCli::parse();

    let layout = IndexLayout::new(&cli.index_dir);
    let context = IndexContext::load(&layout)
        .with_context(|| format!("failed to load index from {:?}", cli.index_dir))?;
    let provider = cli
        .embedder
        .build_provider()
        .context("failed to configure embedding provider")?;
    let engine = RetrievalEngine::new(context, provider)?;

    if cli.dry_run {
        let hits = engine.query(&cli.question, cli.top_k)?;
        if hits.is_empty() {
            bail!("index returned no documents");
        }
        println!("--- Retrieved Context ---\n{}", render_context(&hits));
        println!("dry-run enabled; skipping answer synthesis.");
        return Ok(());
    }

    let key = cli
        .embedder
        .openai_api_key
        .as_deref()
        .ok_or_else(|| anyhow!("OPENAI_API_KEY must be set to generate an answer"))?;
    let synthesizer = OpenAiChat::new(
        key,
        &cli.embedder.openai_base_url,
        cli.chat_model.clone(),
        cli.temperature,
        cli.max_completion_tokens,
    )?;
    let answer = gridrag::answer(&engine, &synthesizer, &cli.question, cli.top_k)?;
    println!("--- Retrieved Context ---\n{}", render_context(&answer.sources));
    println!("--- Answer ---\n{}", answer.text);
    Ok(())
}

fn render_context(hits: &[RetrievedDocument]) -> String {
    let mut out = String::new();
    for (rank, hit) in hits.iter().enumerate() {
        out.push_str(&format!(
            "[{}] {} (distance {:.4}, position {})\n{}\n---\n",
            rank + 1,
            hit.document.id,
            hit.distance,
            hit.position,
            hit.document.content
        ));
    }
    out
}
