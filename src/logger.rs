use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};

pub fn level(verbose: bool) -> LevelFilter {
    if verbose { LevelFilter::Info } else { LevelFilter::Warn }
}

pub fn init(verbose: bool) {
    // Results go to stdout, so logs stay on stderr.
    let config = ConfigBuilder::new()
        .set_target_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off)
        .build();
    let _ = TermLogger::init(level(verbose), config, TerminalMode::Stderr, ColorChoice::Auto);
}
