//! proxydeck CLI - inspect and edit the persisted profile/rule sets and
//! dry-run the resolver, against the same store the service uses.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use proxydeck_core::profiles::ProfileStore;
use proxydeck_core::resolver::RuleSet;
use proxydeck_core::storage::{keys, FileStore, KeyValueStore};
use proxydeck_core::types::{
    Profile, ProfileKind, ProxyAuth, ProxyScheme, Rule, RuleMatcher, Settings,
};
use tabled::{Table, Tabled};

fn default_db_path() -> PathBuf {
    std::env::var_os("PROXYDECK_DB")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("proxydeck")
                .join("proxydeck.json")
        })
}

#[derive(Parser)]
#[command(name = "proxydeck")]
#[command(about = "proxydeck - proxy profile and auto-switch rule manager", version)]
struct Cli {
    /// Store file path
    #[arg(short, long, default_value_os_t = default_db_path())]
    database: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage proxy profiles
    Profiles {
        #[command(subcommand)]
        action: ProfilesAction,
    },
    /// Manage auto-switch rules
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
    /// Dry-run the resolver against a URL (nothing is applied)
    Test {
        /// URL to resolve
        url: String,
    },
    /// Show store status
    Status,
}

#[derive(Subcommand)]
enum ProfilesAction {
    /// List all profiles
    List,
    /// Add or update a fixed-server profile
    Add {
        /// Profile name (key)
        name: String,
        /// Human label (defaults to the name)
        #[arg(long)]
        display_name: Option<String>,
        /// Proxy scheme (http/https/socks4/socks5)
        #[arg(long, default_value = "http")]
        scheme: String,
        #[arg(long)]
        host: String,
        #[arg(long)]
        port: u16,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
    /// Remove a profile
    Remove {
        /// Profile name
        name: String,
    },
}

#[derive(Subcommand)]
enum RulesAction {
    /// List all rules in evaluation order
    List,
    /// Add a rule
    Add {
        /// Rule name
        #[arg(short, long)]
        name: String,
        /// Match kind (domain/url/wildcard/regex)
        #[arg(short, long, default_value = "domain")]
        kind: String,
        /// Pattern to match
        #[arg(short = 'p', long)]
        pattern: String,
        /// Target profile name
        #[arg(long)]
        profile: String,
        /// Rule priority (higher wins)
        #[arg(long, default_value = "100")]
        priority: i32,
    },
    /// Remove a rule
    Remove {
        /// Rule ID
        id: String,
    },
    /// Enable a rule
    Enable {
        /// Rule ID
        id: String,
    },
    /// Disable a rule
    Disable {
        /// Rule ID
        id: String,
    },
}

#[derive(Tabled)]
struct ProfileRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "LABEL")]
    label: String,
    #[tabled(rename = "ENDPOINT")]
    endpoint: String,
    #[tabled(rename = "CURRENT")]
    current: String,
}

#[derive(Tabled)]
struct RuleRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "MATCH")]
    matcher: String,
    #[tabled(rename = "PATTERN")]
    pattern: String,
    #[tabled(rename = "PROFILE")]
    profile: String,
    #[tabled(rename = "PRIO")]
    priority: i32,
    #[tabled(rename = "ENABLED")]
    enabled: String,
}

fn parse_scheme(s: &str) -> Result<ProxyScheme> {
    Ok(match s {
        "http" => ProxyScheme::Http,
        "https" => ProxyScheme::Https,
        "socks4" => ProxyScheme::Socks4,
        "socks5" => ProxyScheme::Socks5,
        other => bail!("unknown scheme {:?} (expected http/https/socks4/socks5)", other),
    })
}

fn matcher_kind(matcher: &RuleMatcher) -> &'static str {
    match matcher {
        RuleMatcher::Domain { .. } => "domain",
        RuleMatcher::Url { .. } => "url",
        RuleMatcher::Wildcard { .. } => "wildcard",
        RuleMatcher::Regex { .. } => "regex",
    }
}

async fn load_rules(store: &FileStore) -> Result<RuleSet> {
    let rules: Vec<Rule> = match store.get(keys::RULES).await? {
        Some(text) => serde_json::from_str(&text).context("stored rules are unreadable")?,
        None => Vec::new(),
    };
    Ok(RuleSet::from_rules(rules))
}

async fn save_rules(store: &FileStore, rules: &RuleSet) -> Result<()> {
    store
        .set(keys::RULES, &serde_json::to_string(rules.rules())?)
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let store = Arc::new(FileStore::open(&cli.database).await?);

    match cli.command {
        Commands::Profiles { action } => {
            let profiles = ProfileStore::new(store.clone());
            profiles.load().await?;

            match action {
                ProfilesAction::List => {
                    let current = profiles.current();
                    let mut rows: Vec<ProfileRow> = profiles
                        .all()
                        .into_values()
                        .map(|p| ProfileRow {
                            endpoint: match &p.kind {
                                ProfileKind::Direct => "-".to_string(),
                                ProfileKind::Fixed {
                                    scheme, host, port, ..
                                } => format!("{}://{}:{}", scheme, host, port),
                            },
                            current: if p.name == current { "*" } else { "" }.to_string(),
                            label: p.display_name,
                            name: p.name,
                        })
                        .collect();
                    rows.sort_by(|a, b| a.name.cmp(&b.name));
                    println!("{}", Table::new(rows));
                }
                ProfilesAction::Add {
                    name,
                    display_name,
                    scheme,
                    host,
                    port,
                    username,
                    password,
                } => {
                    let auth = match (username, password) {
                        (Some(username), Some(password)) => {
                            Some(ProxyAuth { username, password })
                        }
                        (None, None) => None,
                        _ => bail!("--username and --password must be given together"),
                    };
                    let profile = Profile {
                        display_name: display_name.unwrap_or_else(|| name.clone()),
                        name: name.clone(),
                        kind: ProfileKind::Fixed {
                            scheme: parse_scheme(&scheme)?,
                            host,
                            port,
                            auth,
                        },
                    };
                    profiles.add(profile)?;
                    profiles.save().await?;
                    println!("Profile {} saved", name.green());
                }
                ProfilesAction::Remove { name } => {
                    profiles.remove(&name)?;
                    profiles.save().await?;
                    println!("Profile {} removed", name.yellow());
                }
            }
        }

        Commands::Rules { action } => {
            let mut rules = load_rules(&store).await?;

            match action {
                RulesAction::List => {
                    let mut sorted: Vec<&Rule> = rules.rules().iter().collect();
                    sorted.sort_by_key(|r| std::cmp::Reverse(r.priority));
                    let rows: Vec<RuleRow> = sorted
                        .into_iter()
                        .map(|r| RuleRow {
                            id: r.id.chars().take(8).collect(),
                            name: r.name.clone(),
                            matcher: matcher_kind(&r.matcher).to_string(),
                            pattern: r.matcher.pattern().to_string(),
                            profile: r.profile.clone(),
                            priority: r.priority,
                            enabled: if r.enabled { "yes" } else { "no" }.to_string(),
                        })
                        .collect();
                    println!("{}", Table::new(rows));
                }
                RulesAction::Add {
                    name,
                    kind,
                    pattern,
                    profile,
                    priority,
                } => {
                    let matcher = match kind.as_str() {
                        "domain" => RuleMatcher::Domain { pattern },
                        "url" => RuleMatcher::Url { pattern },
                        "wildcard" => RuleMatcher::Wildcard { pattern },
                        "regex" => RuleMatcher::Regex { pattern },
                        other => bail!("unknown match kind {:?}", other),
                    };
                    let mut rule = Rule::new(name, matcher, profile);
                    rule.priority = priority;
                    let id = rule.id.clone();
                    rules.push(rule);
                    save_rules(&store, &rules).await?;
                    println!("Rule {} added", id.green());
                }
                RulesAction::Remove { id } => {
                    let full_id = resolve_rule_id(&rules, &id)?;
                    rules.remove(&full_id)?;
                    save_rules(&store, &rules).await?;
                    println!("Rule {} removed", full_id.yellow());
                }
                RulesAction::Enable { id } => {
                    let full_id = resolve_rule_id(&rules, &id)?;
                    rules.set_enabled(&full_id, true)?;
                    save_rules(&store, &rules).await?;
                    println!("Rule {} enabled", full_id.green());
                }
                RulesAction::Disable { id } => {
                    let full_id = resolve_rule_id(&rules, &id)?;
                    rules.set_enabled(&full_id, false)?;
                    save_rules(&store, &rules).await?;
                    println!("Rule {} disabled", full_id.yellow());
                }
            }
        }

        Commands::Test { url } => {
            let rules = load_rules(&store).await?;
            match rules.resolve(&url) {
                Some(rule) => {
                    println!(
                        "{} rule {} ({} {:?}) -> profile {}",
                        "MATCH".green().bold(),
                        rule.name,
                        matcher_kind(&rule.matcher),
                        rule.matcher.pattern(),
                        rule.profile.cyan()
                    );
                }
                None => println!("{} no rule matched", "MISS".yellow().bold()),
            }
        }

        Commands::Status => {
            let profiles = ProfileStore::new(store.clone());
            profiles.load().await?;
            let rules = load_rules(&store).await?;
            let settings: Settings = match store.get(keys::SETTINGS).await? {
                Some(text) => serde_json::from_str(&text).unwrap_or_default(),
                None => Settings::default(),
            };

            println!("{} {}", "Store:".dimmed(), cli.database.display());
            println!("{} {}", "Profiles:".dimmed(), profiles.names().len());
            println!(
                "{} {} total, {} enabled",
                "Rules:".dimmed(),
                rules.len(),
                rules.rules().iter().filter(|r| r.enabled).count()
            );
            println!("{} {}", "Current:".dimmed(), profiles.current().green());
            println!(
                "{} auto-switch {}, fallback {}, confirm {}",
                "Settings:".dimmed(),
                if settings.auto_switch_enabled { "on" } else { "off" },
                if settings.fallback_to_direct { "on" } else { "off" },
                if settings.confirm_apply { "on" } else { "off" },
            );
        }
    }

    Ok(())
}

/// Accept full rule IDs or an unambiguous prefix.
fn resolve_rule_id(rules: &RuleSet, id: &str) -> Result<String> {
    let matches: Vec<&Rule> = rules
        .rules()
        .iter()
        .filter(|r| r.id.starts_with(id))
        .collect();
    match matches.len() {
        0 => bail!("no rule with id {:?}", id),
        1 => Ok(matches[0].id.clone()),
        n => bail!("id prefix {:?} is ambiguous ({} rules)", id, n),
    }
}
