//! Build-time package metadata, embedded by the `built` build script and surfaced to the CLI
//! definition, the logging filter, and the HTTP User-Agent header.

use log::LevelFilter;

pub mod built_info {
    // generated into OUT_DIR by build.rs
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// The default logging verbosity: chatty on debug builds, informational on release builds.
pub fn default_log_level() -> LevelFilter {
    if built_info::DEBUG {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

/// The package name, which doubles as the logging-filter target.
pub fn package_name() -> &'static str {
    built_info::PKG_NAME
}

pub fn full_version() -> &'static str {
    built_info::PKG_VERSION
}

pub fn authors() -> &'static str {
    built_info::PKG_AUTHORS
}

pub fn description() -> &'static str {
    built_info::PKG_DESCRIPTION
}

/// The `name/version` User-Agent GitHub requires on every API call.
pub fn user_agent() -> String {
    format!("{}/{}", package_name(), full_version())
}
