use std::sync::Arc;

use time::format_description::{self, BorrowedFormatItem};
use time::UtcOffset;
use tracing_subscriber::filter::dynamic_filter_fn;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::Cli;

fn default_filter(debug: u8) -> &'static str {
    match debug {
        0 => "bastion=info",
        1 => "bastion=debug",
        _ => "bastion=trace,russh=debug",
    }
}

fn timer(
    offset: UtcOffset,
    format: &'static str,
) -> OffsetTime<Vec<BorrowedFormatItem<'static>>> {
    OffsetTime::new(
        offset,
        format_description::parse(format).unwrap_or_default(),
    )
}

pub fn init_logging(cli: &Cli) {
    let env_filter = match std::env::var("RUST_LOG") {
        Ok(_) if cli.debug == 0 => EnvFilter::from_default_env(),
        _ => EnvFilter::new(default_filter(cli.debug)),
    };
    let env_filter = Arc::new(env_filter);

    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    let enable_colors = console::user_attended();

    let full_fmt_layer = {
        let env_filter = env_filter.clone();
        tracing_subscriber::fmt::layer()
            .with_ansi(enable_colors)
            .with_timer(timer(
                offset,
                "[day].[month].[year] [hour]:[minute]:[second]",
            ))
            .with_filter(dynamic_filter_fn(move |m, c| {
                env_filter.enabled(m, c.clone())
            }))
    };
    let compact_fmt_layer = {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_ansi(enable_colors)
            .with_target(false)
            .with_timer(timer(offset, "[hour]:[minute]:[second]"))
            .with_filter(dynamic_filter_fn(move |m, c| {
                env_filter.enabled(m, c.clone())
            }))
    };

    let r = tracing_subscriber::registry();
    let r = r.with(if !enable_colors {
        Some(full_fmt_layer)
    } else {
        None
    });
    let r = r.with(if enable_colors {
        Some(compact_fmt_layer)
    } else {
        None
    });

    r.init();
}
