//! Subcommand implementations.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use futures::StreamExt;
use serde::Serialize;

use pickup_core::api::fetch_by_code;
use pickup_core::console::Tracked;
use pickup_core::ledger::{fetch_tail, scan_history};
use pickup_core::models::{
    Agent, Child, EntityKind, ListQuery, Parent, ProposedScan, Recuperator, ScanType,
    StatusFilter,
};
use pickup_core::presence::activity_of;
use pickup_core::{Config, Console, Error};

use crate::output::{page_footer, stats_summary, table, Row};

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ===== list =====

pub async fn list(
    console: &mut Console,
    kind: EntityKind,
    page: u32,
    search: &str,
    status: StatusFilter,
    pin: Option<String>,
    json: bool,
) -> Result<()> {
    let query = ListQuery::new(kind).page(page).search(search).status(status);
    match kind {
        EntityKind::Parent => list_typed::<Parent>(console, query, pin, json).await,
        EntityKind::Child => list_typed::<Child>(console, query, pin, json).await,
        EntityKind::Recuperator => list_typed::<Recuperator>(console, query, pin, json).await,
        EntityKind::Agent => list_typed::<Agent>(console, query, pin, json).await,
    }
}

async fn list_typed<T>(console: &mut Console, query: ListQuery, pin: Option<String>, json: bool) -> Result<()>
where
    T: Tracked + Row + Serialize,
{
    let api = console.api();
    let slot = console.slot_mut::<T>();
    let page = slot
        .directory
        .page(&query)
        .await
        .with_context(|| format!("Failed to list {}", T::KIND.collection()))?;

    slot.resolver.pin(pin);
    slot.resolver.settle(api.as_ref(), &page.items).await;
    if let Some(stale) = slot.resolver.stale_reference() {
        eprintln!("warning: {}", stale);
    }
    let rows = slot.resolver.resolve(&page.items);

    if json {
        return print_json(&rows);
    }
    println!("{}", table(rows));
    println!("{}", page_footer(&page));
    Ok(())
}

// ===== show =====

pub async fn show(console: &Console, kind: EntityKind, code: &str, json: bool) -> Result<()> {
    let api = console.api();
    match kind {
        EntityKind::Parent => {
            let parent = fetch_by_code::<Parent>(api.as_ref(), code).await?;
            if json {
                return print_json(&parent);
            }
            println!("{}", table([&parent]));
            if !parent.children.is_empty() {
                println!();
                println!("{}", table(&parent.children));
            }
        }
        EntityKind::Child => {
            let child = fetch_by_code::<Child>(api.as_ref(), code).await?;
            let mut tails = HashMap::new();
            tails.insert(child.code.clone(), fetch_tail(api, code).await?);
            let activity = activity_of(&tails, code);
            if json {
                return print_json(&serde_json::json!({
                    "child": child,
                    "presence": activity.state,
                    "counts": activity.counts,
                    "lastEvent": activity.last_event,
                }));
            }
            println!("{}", table([&child]));
            println!();
            println!("{}", table([&activity]));
        }
        EntityKind::Recuperator => {
            let recuperator = fetch_by_code::<Recuperator>(api.as_ref(), code).await?;
            if json {
                return print_json(&recuperator);
            }
            println!("{}", table([&recuperator]));
        }
        EntityKind::Agent => {
            let agent = fetch_by_code::<Agent>(api.as_ref(), code).await?;
            if json {
                return print_json(&agent);
            }
            println!("{}", table([&agent]));
        }
    }
    Ok(())
}

// ===== scan =====

pub async fn scan(
    console: &mut Console,
    scan_type: ScanType,
    child: &str,
    recuperator: Option<String>,
    agent: Option<String>,
    json: bool,
) -> Result<()> {
    let agent = agent
        .or_else(|| console.agent_code().map(String::from))
        .ok_or_else(|| anyhow!("No scanning agent: pass --agent or set PICKUP_AGENT"))?;

    let proposed = match scan_type {
        ScanType::Entry => {
            let scan = ProposedScan::entry(child, agent);
            match recuperator {
                Some(code) => scan.with_recuperator(code),
                None => scan,
            }
        }
        ScanType::Exit => ProposedScan::exit(child, agent, recuperator),
    };

    let receipt = match console.submit_scan(proposed).await {
        Ok(receipt) => receipt,
        Err(Error::UnauthorizedPickup { child, recuperator }) => {
            bail!("REFUSED: {} is not authorized to pick up {}", recuperator, child)
        }
        Err(e) => return Err(e).context("Scan failed"),
    };

    if json {
        return print_json(&receipt);
    }
    println!("{}", table([&receipt.event]));
    for warning in &receipt.warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

// ===== history =====

pub async fn history(console: &Console, child: &str, limit: usize, json: bool) -> Result<()> {
    let events = scan_history(console.api(), child.to_string())
        .take(limit)
        .collect::<Vec<_>>()
        .await
        .into_iter()
        .collect::<pickup_core::Result<Vec<_>>>()
        .with_context(|| format!("Failed to load history of {}", child))?;

    if json {
        return print_json(&events);
    }
    if events.is_empty() {
        println!("No scans for {}", child);
    } else {
        println!("{}", table(&events));
    }
    Ok(())
}

// ===== stats / watch =====

async fn load_cohort(console: &mut Console, query: ListQuery) -> Result<()> {
    console.refresh_cohort(query)?;
    console.settle().await;
    // The only status a cohort refresh leaves behind is its failure
    if let Some(message) = console.status_message.take() {
        bail!(message);
    }
    Ok(())
}

pub async fn stats(console: &mut Console, page: u32, search: &str, detail: bool, json: bool) -> Result<()> {
    load_cohort(console, ListQuery::new(EntityKind::Child).page(page).search(search)).await?;
    let stats = console.cohort_stats();

    if json {
        return print_json(&stats);
    }
    if detail {
        let rows: Vec<_> = console.cohort().iter().map(|c| console.activity(c)).collect();
        println!("{}", table(&rows));
        println!();
    }
    println!("{}", stats_summary(&stats));
    Ok(())
}

pub async fn watch(console: &mut Console, search: &str, period: Duration) -> Result<()> {
    let query = ListQuery::new(EntityKind::Child).search(search);
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        match load_cohort(console, query.clone()).await {
            Ok(()) => println!("[{}] {}", Local::now().format("%H:%M:%S"), stats_summary(&console.cohort_stats())),
            Err(e) => eprintln!("[{}] {:#}", Local::now().format("%H:%M:%S"), e),
        }
    }
}

// ===== assign =====

pub async fn assign(console: &mut Console, recuperator: &str, children: &[String]) -> Result<()> {
    match console.assign_authorized_children(recuperator, children).await {
        Ok(()) => {}
        Err(Error::ReferentialViolation { parent, children, .. }) => {
            bail!("REFUSED: {} not children of {}", children.join(", "), parent)
        }
        Err(e) => return Err(e).context("Assignment failed"),
    }
    console.settle().await;

    if children.is_empty() {
        println!("{} may no longer collect any child", recuperator);
    } else {
        println!("{} may collect {}", recuperator, children.join(", "));
    }
    Ok(())
}

// ===== config =====

/// Overwrite the given settings. Returns whether anything changed.
fn apply_config_changes(
    config: &mut Config,
    url: Option<String>,
    agent: Option<String>,
    page_size: Option<u32>,
) -> Result<bool> {
    let mut changed = false;
    if let Some(url) = url {
        let url = url.trim().trim_end_matches('/').to_string();
        if url.is_empty() {
            bail!("API base URL cannot be empty");
        }
        config.api_base_url = Some(url);
        changed = true;
    }
    if let Some(agent) = agent {
        let agent = agent.trim().to_string();
        config.agent_code = if agent.is_empty() { None } else { Some(agent) };
        changed = true;
    }
    if let Some(page_size) = page_size {
        if page_size == 0 {
            bail!("page size must be at least 1");
        }
        config.page_size = Some(page_size);
        changed = true;
    }
    Ok(changed)
}

pub fn config(
    mut config: Config,
    url: Option<String>,
    agent: Option<String>,
    page_size: Option<u32>,
    json: bool,
) -> Result<()> {
    if apply_config_changes(&mut config, url, agent, page_size)? {
        let path = config.save().context("Failed to save configuration")?;
        eprintln!("Saved {}", path.display());
    }
    if json {
        return print_json(&config);
    }
    println!("api url    {}", config.api_base_url());
    println!("agent      {}", config.agent_code().unwrap_or_else(|| "-".to_string()));
    println!("page size  {}", config.page_size());
    println!("refresh    {}s", config.refresh_interval().as_secs());
    Ok(())
}
