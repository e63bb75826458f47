use std::error::Error;
use std::process::ExitCode;

use bumpmate::Companion;
use bumpmate::cli::{Cli, Command, ServeArgs};
use bumpmate::config::AppConfig;
use bumpmate::metadata::{PKG_NAME, PKG_VERSION};
use bumpmate::reconcile::Resolution;
use bumpmate::server::CompanionServer;
use bumpmate::tasks::WeekTasks;
use bumpmate::week;
use clap::Parser;
use colored::Colorize;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto::Builder,
    service::TowerToHyperService,
};
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use rmcp::{ServiceExt, transport::stdio};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type MainResult<T> = Result<T, Box<dyn Error>>;

#[tokio::main]
async fn main() -> ExitCode {
    // stdout belongs to the stdio transport and to command output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> MainResult<()> {
    match &cli.command {
        Command::Version => {
            println!("{PKG_NAME} {PKG_VERSION}");
            return Ok(());
        }
        Command::Week(args) => {
            let today = args.on.unwrap_or_else(week::today);
            let current = week::current_week(args.due_date, today);
            println!(
                "{} {current} ({} to go)",
                "week".green().bold(),
                week::weeks_remaining(current)
            );
            return Ok(());
        }
        _ => {}
    }

    let config = AppConfig::from_args(&cli.global)?;
    let companion = config.build()?;
    tracing::debug!(identity = config.identity_mode(), "companion ready");

    match cli.command {
        Command::Resolve => print_resolution(&companion.resolve().await?),
        Command::Onboard(args) => {
            companion
                .complete_onboarding(args.role, args.due_date, args.nickname)
                .await?;
            println!("{}", "onboarding saved".green());
            print_resolution(&companion.resolve().await?);
        }
        Command::Invite => {
            let code = companion.generate_invite().await?;
            println!("{} {code}", "invite code:".green().bold());
            if let Some(ttl) = companion.pairing.policy().invite_ttl {
                println!("valid for {} minutes", ttl.as_secs() / 60);
            }
        }
        Command::Accept(args) => {
            let result = companion.accept_invite(&args.code).await?;
            match &result.partner {
                Some(partner) => println!(
                    "{} {} ({})",
                    "paired with".green().bold(),
                    partner.nickname,
                    partner.partner_id
                ),
                None => println!("{} {}", "paired with".green().bold(), result.partner_id),
            }
            if let Some(resolution) = &result.resolution {
                print_resolution(resolution);
            }
        }
        Command::Unlink => {
            companion.unlink_partner().await?;
            println!("{}", "partner unlinked".yellow());
        }
        Command::Partner => match companion.partner_status().await? {
            Some(partner) => print_json(&partner)?,
            None => println!("{}", "no partner linked".yellow()),
        },
        Command::Tasks(args) => {
            let session = companion.session();
            if args.partner {
                let week = companion.week_context(args.week).await?;
                print_json(&companion.tasks.partner_tasks(&session, week).await?)?;
            } else {
                let (week, role) = companion.task_context(args.week, args.role).await?;
                print_tasks(&companion.tasks.list_tasks(&session, week, role).await?);
            }
        }
        Command::ToggleTask(args) => {
            let (week, role) = companion.task_context(args.week, args.role).await?;
            let task = companion
                .tasks
                .toggle_system_task(&companion.session(), week, role, args.index, !args.undo)
                .await?;
            print_json(&task)?;
        }
        Command::AddTask(args) => {
            let (week, role) = companion.task_context(args.week, args.role).await?;
            let task = companion
                .tasks
                .add_custom_task(&companion.session(), week, role, &args.content)
                .await?;
            println!("{} {}", "added".green(), task.id);
        }
        Command::ToggleCustom(args) => {
            let week = companion.week_context(args.week).await?;
            let task = companion
                .tasks
                .toggle_custom_task(&companion.session(), week, &args.id, !args.undo)
                .await?;
            print_json(&task)?;
        }
        Command::DeleteTask(args) => {
            companion
                .tasks
                .delete_custom_task(&companion.session(), &args.id)
                .await?;
            println!("{} {}", "deleted".yellow(), args.id);
        }
        Command::Serve(args) => serve(companion, &config, args).await?,
        Command::Version | Command::Week(_) => {}
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> MainResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_resolution(resolution: &Resolution) {
    match resolution {
        Resolution::Ready(resolved) => {
            let role = resolved.role().map(|r| r.as_str()).unwrap_or("-");
            println!(
                "{} {} ({role}), week {} of 40, {} weeks to go [{:?}]",
                "ready:".green().bold(),
                resolved.nickname,
                resolved.current_week,
                resolved.weeks_remaining,
                resolved.source
            );
        }
        Resolution::NeedsOnboarding => {
            println!("{}", "needs onboarding".yellow().bold());
        }
    }
}

fn print_tasks(tasks: &WeekTasks) {
    println!("{} {} ({})", "week".bold(), tasks.week, tasks.role);
    for (index, task) in tasks.system.iter().enumerate() {
        let mark = if task.is_completed { "x".green() } else { " ".normal() };
        println!("  [{mark}] {index}. {}", task.title);
    }
    for task in &tasks.custom {
        let mark = if task.is_completed { "x".green() } else { " ".normal() };
        println!("  [{mark}] {} {}", task.content, task.id.dimmed());
    }
}

async fn serve(companion: Companion, config: &AppConfig, args: ServeArgs) -> MainResult<()> {
    let http_addr = args.validate()?;
    let server = CompanionServer::new(companion, config.identity_mode(), config.remote_url.clone());
    tracing::info!(name = %args.server_name, identity = config.identity_mode(), "starting MCP server");

    let ct = CancellationToken::new();
    tokio::spawn({
        let ct = ct.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                ct.cancel();
            }
        }
    });

    let mut tasks = JoinSet::new();

    if args.enable_stdio {
        let service = server.clone().serve(stdio()).await?;
        let ct = ct.clone();
        tasks.spawn(async move {
            tokio::select! {
                _ = service.waiting() => tracing::info!("stdio transport closed"),
                _ = ct.cancelled() => {}
            }
        });
    }

    if args.enable_http {
        let factory = server.clone();
        let http_service = TowerToHyperService::new(StreamableHttpService::new(
            move || Ok(factory.clone()),
            LocalSessionManager::default().into(),
            Default::default(),
        ));
        let listener = TcpListener::bind(http_addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "streamable HTTP listening");
        let ct = ct.clone();
        tasks.spawn(async move {
            loop {
                let stream = tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => stream,
                        Err(err) => {
                            tracing::warn!("HTTP accept error: {err}");
                            continue;
                        }
                    },
                    _ = ct.cancelled() => break,
                };
                let io = TokioIo::new(stream);
                let service = http_service.clone();
                tokio::spawn(async move {
                    if let Err(err) = Builder::new(TokioExecutor::new())
                        .serve_connection(io, service)
                        .await
                    {
                        tracing::warn!("HTTP connection error: {err}");
                    }
                });
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined {
            tracing::warn!("transport task failed: {err}");
        }
    }
    Ok(())
}
