//! Command-line front end for PaperTrade.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use papertrade_core::models::message::{CoachScope, Role};
use papertrade_core::models::portfolio::PortfolioId;
use papertrade_core::models::settings::Settings;
use papertrade_core::models::transaction::TradeSide;
use papertrade_core::services::auth_service::SessionState;
use papertrade_core::services::coach_service::{format_holdings_text, INTRO_TEXT, QUICK_PROMPTS};
use papertrade_core::services::trade_service::ExecutionMode;
use papertrade_core::storage::file::FileStore;
use papertrade_core::telemetry::init_tracing;
use papertrade_core::TradeDesk;

#[derive(Parser, Debug)]
#[command(name = "papertrade", version, about = "Paper trading, coaching and lessons from the terminal")]
struct Cli {
    /// Local state file (created on first write)
    #[arg(long, env = "PAPERTRADE_STORE", default_value = "papertrade-store.json")]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and keep the session token
    Login {
        username: String,
        #[arg(long, env = "PAPERTRADE_PASSWORD")]
        password: String,
    },
    /// Create an account
    Register {
        username: String,
        #[arg(long, env = "PAPERTRADE_PASSWORD")]
        password: String,
        #[arg(long)]
        email: Option<String>,
    },
    Logout,
    /// Show who the backend thinks you are
    Whoami,

    /// List all stocks with prices
    Stocks,
    Search {
        query: String,
    },
    /// Price and recent history of one ticker
    Quote {
        ticker: String,
    },

    /// List portfolios
    Portfolios,
    Create {
        name: String,
    },
    /// Holdings, cash and transactions of a portfolio
    Show {
        id: PortfolioId,
    },
    Buy {
        id: PortfolioId,
        ticker: String,
        quantity: f64,
        /// Limit price; defaults to the live price
        #[arg(long)]
        price: Option<f64>,
    },
    Sell {
        id: PortfolioId,
        ticker: String,
        quantity: f64,
        #[arg(long)]
        price: Option<f64>,
    },
    /// Set the simulated cash balance
    SetCash {
        id: PortfolioId,
        cash: f64,
    },
    Delete {
        id: PortfolioId,
    },
    /// Replay trades simulated while offline
    Reconcile {
        id: PortfolioId,
    },

    /// Talk to the AI coach
    Coach {
        #[command(subcommand)]
        action: CoachAction,
    },

    /// Lessons and quizzes
    Learn {
        #[command(subcommand)]
        action: LearnAction,
    },
}

#[derive(Subcommand, Debug)]
enum CoachAction {
    /// Send a message (omit to list suggested prompts)
    Ask {
        message: Option<String>,
        #[arg(long)]
        portfolio: Option<PortfolioId>,
    },
    History {
        #[arg(long)]
        portfolio: Option<PortfolioId>,
    },
    Clear {
        #[arg(long)]
        portfolio: Option<PortfolioId>,
    },
    /// Conversation logs saved by the backend
    Logs {
        #[arg(long)]
        portfolio: Option<PortfolioId>,
    },
}

#[derive(Subcommand, Debug)]
enum LearnAction {
    Lessons,
    /// Take a quiz interactively
    Quiz {
        lesson: u32,
    },
    Progress,
    /// Mark a lesson completed
    Complete {
        lesson: u32,
    },
    Reset,
}

fn scope(portfolio: Option<PortfolioId>) -> CoachScope {
    portfolio.map_or(CoachScope::Global, CoachScope::Portfolio)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("papertrade_core=warn,papertrade=info");

    let cli = Cli::parse();
    let settings = Settings::from_env().context("invalid configuration")?;
    let store = FileStore::open(&cli.store)
        .with_context(|| format!("cannot open store {}", cli.store.display()))?;
    debug!(store = %cli.store.display(), api = %settings.api_base, "starting");
    let desk = TradeDesk::connect(settings, Arc::new(store))?;

    run(&desk, cli.command).await
}

async fn run(desk: &TradeDesk, command: Command) -> anyhow::Result<()> {
    match command {
        // ── Session ─────────────────────────────────────────────────
        Command::Login { username, password } => {
            let state = desk.auth().login(&username, &password).await?;
            print_session(&state);
        }
        Command::Register {
            username,
            password,
            email,
        } => {
            let state = desk
                .auth()
                .register(&username, &password, email.as_deref())
                .await?;
            print_session(&state);
        }
        Command::Logout => {
            desk.auth().logout().await?;
            println!("Logged out.");
        }
        Command::Whoami => print_session(&desk.verify_session().await?),

        // ── Market ──────────────────────────────────────────────────
        Command::Stocks => {
            for s in desk.stocks().await? {
                match s.live_price() {
                    Some(p) => println!(
                        "{:<12} {:<32} ₹{:>10.2} {:>+7.2}%",
                        s.ticker,
                        s.name,
                        p,
                        s.change_percent.unwrap_or_default()
                    ),
                    None => println!("{:<12} {:<32} {:>11}", s.ticker, s.name, "n/a"),
                }
            }
        }
        Command::Search { query } => {
            let hits = desk.search(&query).await?;
            if hits.is_empty() {
                println!("No matches.");
            }
            for s in hits {
                println!("{:<12} {}", s.ticker, s.name);
            }
        }
        Command::Quote { ticker } => {
            let s = desk.market().stock(&ticker).await?;
            println!("{} {}", s.ticker, s.name);
            match s.live_price() {
                Some(p) => println!("Price: ₹{p:.2}"),
                None => println!("Price: n/a"),
            }
            for point in s.history.iter().rev().take(10).rev() {
                println!("  {:<20} ₹{:.2}", point.time, point.price);
            }
        }

        // ── Portfolios ──────────────────────────────────────────────
        Command::Portfolios => {
            let listing = desk.portfolios().await?;
            println!("Portfolios ({}):", listing.source);
            for p in listing.portfolios {
                println!("  #{:<5} {}", p.id, p.name);
            }
        }
        Command::Create { name } => {
            let (created, source) = desk.create_portfolio(&name).await?;
            println!("Created #{} {} ({source})", created.id, created.name);
        }
        Command::Show { id } => {
            let d = desk.portfolio_detail(id).await?;
            println!(
                "#{} {} [{}]",
                d.id,
                d.name.as_deref().unwrap_or("(unnamed)"),
                d.source
            );
            println!("Cash: ₹{:.2}", d.cash);
            for h in &d.holdings {
                println!(
                    "  {:<12} qty {:>8} avg ₹{:>10.2} now ₹{:>10.2} P/L ₹{:>+10.2}",
                    h.ticker, h.quantity, h.avg_cost, h.current_price, h.pl
                );
            }
            println!(
                "Total value: ₹{:.2}  Total P/L: ₹{:+.2}",
                d.totals.total_value, d.totals.total_pl
            );
            let c = d.coach_counts;
            println!(
                "Coach labels: NORMAL {} / FOMO {} / PANIC {} / other {}",
                c.normal, c.fomo, c.panic, c.other
            );
            for t in d.transactions.iter().take(20) {
                println!(
                    "  {} {} {} @ ₹{:.2} [{}] {}",
                    t.side,
                    t.quantity,
                    t.ticker,
                    t.price,
                    t.coach_class,
                    t.timestamp.as_deref().unwrap_or("")
                );
            }
            let pending = desk.trades().pending_offline_trades(id)?;
            if !pending.is_empty() {
                println!("{} simulated trade(s) waiting for `reconcile`.", pending.len());
            }
        }
        Command::Buy {
            id,
            ticker,
            quantity,
            price,
        } => trade(desk, id, &ticker, TradeSide::Buy, quantity, price).await?,
        Command::Sell {
            id,
            ticker,
            quantity,
            price,
        } => trade(desk, id, &ticker, TradeSide::Sell, quantity, price).await?,
        Command::SetCash { id, cash } => {
            let summary = desk.set_cash(id, cash)?;
            println!("Simulated cash for #{id}: ₹{:.2}", summary.cash);
        }
        Command::Delete { id } => {
            desk.delete_portfolio(id).await?;
            println!("Deleted #{id}.");
        }
        Command::Reconcile { id } => {
            let report = desk.reconcile(id).await?;
            println!("Submitted {} queued trade(s).", report.submitted);
            for r in &report.rejected {
                println!(
                    "  rejected: {} {} {}: {}",
                    r.request.side, r.request.quantity, r.request.ticker, r.reason
                );
            }
            if let Some(why) = &report.stopped {
                println!("Stopped early ({why}); {} still queued.", report.remaining);
            }
        }

        // ── Coach ───────────────────────────────────────────────────
        Command::Coach { action } => coach(desk, action).await?,

        // ── Learn ───────────────────────────────────────────────────
        Command::Learn { action } => learn(desk, action)?,
    }
    Ok(())
}

async fn trade(
    desk: &TradeDesk,
    id: PortfolioId,
    ticker: &str,
    side: TradeSide,
    quantity: f64,
    price: Option<f64>,
) -> anyhow::Result<()> {
    let outcome = match price {
        Some(price) => desk.trade(id, ticker, side, quantity, price).await?,
        None => desk.trade_at_market(id, ticker, side, quantity).await?,
    };
    println!("{}", outcome.message());
    if outcome.mode == ExecutionMode::Simulated {
        println!("Offline mode: queued for `papertrade reconcile {id}`.");
    }
    println!("Cash: ₹{:.2}", outcome.summary.cash);
    Ok(())
}

async fn coach(desk: &TradeDesk, action: CoachAction) -> anyhow::Result<()> {
    match action {
        CoachAction::Ask { message, portfolio } => {
            let Some(message) = message else {
                println!("{INTRO_TEXT}\n");
                for p in QUICK_PROMPTS {
                    println!("  papertrade coach ask \"{p}\"");
                }
                return Ok(());
            };
            let scope = scope(portfolio);
            if let Some((pid, summary)) = desk.coach().resolve_summary(scope)? {
                debug!(portfolio_id = pid, holdings = %format_holdings_text(&summary.holdings), "coach context");
            }
            let reply = desk.ask_coach(scope, &message).await?;
            println!("{}", reply.text);
        }
        CoachAction::History { portfolio } => {
            for m in desk.coach().history(scope(portfolio))? {
                let who = match m.role {
                    Role::User => "you",
                    Role::Assistant => "coach",
                };
                println!("[{}] {who}: {}", m.ts.format("%Y-%m-%d %H:%M"), m.text);
            }
        }
        CoachAction::Clear { portfolio } => {
            desk.coach().clear_history(scope(portfolio))?;
            println!("Coach history cleared.");
        }
        CoachAction::Logs { portfolio } => {
            for l in desk.coach().saved_logs(portfolio).await? {
                println!("[{}] {}: {}", l.ts.as_deref().unwrap_or("-"), l.role, l.text);
            }
        }
    }
    Ok(())
}

fn learn(desk: &TradeDesk, action: LearnAction) -> anyhow::Result<()> {
    let learn = desk.learn();
    match action {
        LearnAction::Lessons => {
            for l in learn.lessons() {
                println!("{}. {}\n   {}", l.id, l.title, l.content);
                for link in &l.links {
                    println!("   - {} <{}>", link.title, link.href);
                }
            }
        }
        LearnAction::Quiz { lesson } => {
            let mut attempt = desk.start_quiz(lesson, &mut rand::thread_rng())?;
            let stdin = io::stdin();
            let mut lines = stdin.lock().lines();

            while let Some(q) = attempt.current().cloned() {
                println!("\n{}", q.question);
                for (i, opt) in q.options.iter().enumerate() {
                    println!("  {}) {}", i + 1, opt);
                }
                print!("> ");
                io::stdout().flush()?;
                let Some(line) = lines.next() else {
                    bail!("quiz aborted");
                };
                let choice = match line?.trim().parse::<usize>() {
                    Ok(n) if (1..=q.options.len()).contains(&n) => n - 1,
                    _ => {
                        println!("Enter a number between 1 and {}.", q.options.len());
                        continue;
                    }
                };
                println!("{}", attempt.answer(choice)?.message());
            }

            let score = attempt.score();
            let entry = learn.record_attempt(&attempt)?;
            println!(
                "\nScore: {}/{} ({}%). Attempts so far: {}.",
                score.correct, score.total, score.pct, entry.attempts
            );
            println!("Run `papertrade learn complete {lesson}` to mark the lesson completed.");
        }
        LearnAction::Progress => {
            let progress = learn.progress()?;
            for l in learn.lessons() {
                match progress.iter().find(|p| p.lesson_id == l.id) {
                    Some(p) => println!(
                        "{}. {:<36} last {:>3}%  attempts {}  completed {}",
                        l.id, l.title, p.last_score_pct, p.attempts, p.completed_count
                    ),
                    None => println!("{}. {:<36} not started", l.id, l.title),
                }
            }
            println!("Overall: {:.0}%", learn.overall_progress_pct()?);
        }
        LearnAction::Complete { lesson } => {
            let entry = learn.mark_completed(lesson)?;
            println!("Lesson {lesson} completed {} time(s).", entry.completed_count);
        }
        LearnAction::Reset => {
            learn.reset_progress()?;
            println!("Progress reset.");
        }
    }
    Ok(())
}

fn print_session(state: &SessionState) {
    match state {
        SessionState::Authenticated { user } => println!("Signed in as {}.", user.label()),
        SessionState::Anonymous => println!("Not signed in (local-only mode)."),
    }
}
