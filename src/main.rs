use anyhow::Context;

mod android_dumpsys_usagestats_parser;
mod app_list;
mod config;
mod content_provider;
mod daemon;
mod error;
mod foreground;
mod icon;
mod lock_prompt;
mod notification;
mod poller;
mod remote;
mod shell;

use app_list::AppListView;
use config::Config;
use content_provider::{ContentProviderQuery, LockedPackageSource};
use poller::LockService;
use remote::FirebaseCollection;

fn init_logging(config: &Config) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(log::LevelFilter::Info).parse_default_env();

    if let Some(path) = &config.log_file {
        match std::fs::OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("cannot open log file {path}: {e}, logging to stderr"),
        }
    }

    let _ = builder.try_init();
}

fn run_poller(config: &Config) -> anyhow::Result<()> {
    log::info!("Running...{:?}", config);
    LockService::from_config(config).start();
    Ok(())
}

fn print_foreground(config: &Config) -> anyhow::Result<()> {
    let source = foreground::source_for(config.foreground_source);
    let now = chrono::Local::now().naive_local();
    let begin = now - chrono::Duration::seconds(config.usage_window_secs as i64);
    let stats = source.query_usage_stats(begin, now)?;

    match foreground::current_foreground(&stats) {
        Some(stat) => println!("{} (last used {})", stat.package, stat.last_time_used),
        None => println!("No usage stats available."),
    }
    Ok(())
}

fn print_locked(config: &Config) -> anyhow::Result<()> {
    let provider = ContentProviderQuery::new(
        config.locked_packages_uri.as_str(),
        config.locked_package_column.as_str(),
    );
    for package in provider.locked_packages()? {
        println!("{package}");
    }
    Ok(())
}

fn show_app_list(config: &Config) -> anyhow::Result<()> {
    let collection =
        FirebaseCollection::new(&config.firebase).context("cannot open the app list")?;
    let mut view = AppListView::new(Box::new(|screen: &str| {
        print!("\x1b[2J\x1b[H{screen}");
    }));
    view.show(&collection, || daemon::start_service(config));
    Ok(())
}

fn usage() {
    eprintln!(
        "usage: app_lock [poll | watchdog | list | foreground | locked | install | stop]"
    );
}

fn main() -> anyhow::Result<()> {
    let config_path = Config::path();
    let config = match Config::load_or_init(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to read config: {e:?}");
            return Err(e);
        }
    };
    init_logging(&config);

    let args: Vec<String> = std::env::args().collect();
    let args: Vec<&str> = args.iter().skip(1).map(String::as_str).collect();

    match args.as_slice() {
        [] => daemon::start_service(&config),
        ["poll"] => run_poller(&config),
        ["watchdog"] => daemon::watchdog(),
        ["list"] => show_app_list(&config),
        ["foreground"] => print_foreground(&config),
        ["locked"] => print_locked(&config),
        ["install"] => daemon::install(),
        ["stop"] => daemon::stop(&config),
        _ => {
            usage();
            Ok(())
        }
    }
}
