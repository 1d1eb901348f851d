use std::io;
use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{App, Arg, ArgMatches};
use usbdevs::{ConfigIndex, MAX_DEVICE_ADDRESS, Mode, Report, ReportConfig};

const USB_MAX_CONFIGS: u16 = 255;
const MODES: [&str; 4] = ["config", "device", "full", "stats"];

fn app() -> App<'static, 'static> {
    let exclusive = |name: &'static str| -> Vec<&'static str> {
        MODES.iter().copied().filter(|m| *m != name).collect()
    };

    App::new("usbdevs")
        .about("Show USB devices connected to the system")
        .arg(
            Arg::with_name("addr")
                .short("a")
                .takes_value(true)
                .value_name("ADDR")
                .help("Only report the device at this address"),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .takes_value(true)
                .min_values(0)
                .max_values(1)
                .value_name("N")
                .conflicts_with_all(&exclusive("config"))
                .help("Print the configuration descriptor"),
        )
        .arg(
            Arg::with_name("controller")
                .short("d")
                .takes_value(true)
                .value_name("USBDEV")
                .help("Only report this controller"),
        )
        .arg(
            Arg::with_name("device")
                .short("e")
                .conflicts_with_all(&exclusive("device"))
                .help("Print the device descriptor"),
        )
        .arg(
            Arg::with_name("full")
                .short("f")
                .takes_value(true)
                .min_values(0)
                .max_values(1)
                .value_name("N")
                .conflicts_with_all(&exclusive("full"))
                .help("Dump every descriptor of a configuration"),
        )
        .arg(
            Arg::with_name("stats")
                .short("s")
                .conflicts_with_all(&exclusive("stats"))
                .help("Print controller statistics"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .help("More detail, repeat for port status"),
        )
}

/// Configuration numbers on the command line start at 1.
fn config_index(matches: &ArgMatches, name: &str) -> anyhow::Result<ConfigIndex> {
    let Some(value) = matches.value_of(name) else {
        return Ok(ConfigIndex::Current);
    };
    let n: u16 = value.parse().with_context(|| format!("config {}: invalid", value))?;
    if !(1..=USB_MAX_CONFIGS).contains(&n) {
        bail!("config {}: out of range", value);
    }
    Ok(ConfigIndex::Index((n - 1) as u8))
}

fn parse_config(matches: &ArgMatches) -> anyhow::Result<ReportConfig> {
    let address = match matches.value_of("addr") {
        Some(value) => {
            let addr: u8 = value.parse().with_context(|| format!("addr {}: invalid", value))?;
            if !(1..MAX_DEVICE_ADDRESS).contains(&addr) {
                bail!("addr {}: out of range", value);
            }
            Some(addr)
        }
        None => None,
    };

    let mode = if matches.is_present("config") {
        Mode::ConfigDescriptor(config_index(matches, "config")?)
    } else if matches.is_present("full") {
        Mode::FullDump(config_index(matches, "full")?)
    } else if matches.is_present("device") {
        Mode::DeviceDescriptor
    } else if matches.is_present("stats") {
        Mode::Stats
    } else {
        Mode::Summary
    };

    Ok(ReportConfig {
        mode,
        controller: matches.value_of_os("controller").map(PathBuf::from),
        address,
        verbosity: matches.occurrences_of("verbose").min(u8::MAX as u64) as u8,
    })
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let matches = app().get_matches();
    let config = parse_config(&matches)?;
    log::debug!("{:?}", config);

    let stdout = io::stdout();
    Report::new(stdout.lock(), config).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ReportConfig> {
        let matches = app().get_matches_from_safe(std::iter::once("usbdevs").chain(args.iter().copied()))?;
        parse_config(&matches)
    }

    #[test]
    fn defaults_to_summary_of_everything() {
        assert_eq!(parse(&[]).unwrap(), ReportConfig::default());
    }

    #[test]
    fn verbosity_counts() {
        let config = parse(&["-v", "-v", "-a", "4"]).unwrap();
        assert_eq!(config.verbosity, 2);
        assert_eq!(config.address, Some(4));
    }

    #[test]
    fn config_number_is_one_based() {
        let config = parse(&["-f2", "-d", "/dev/bus/usb/001"]).unwrap();
        assert_eq!(config.mode, Mode::FullDump(ConfigIndex::Index(1)));
        assert_eq!(config.controller, Some(PathBuf::from("/dev/bus/usb/001")));

        let config = parse(&["-c"]).unwrap();
        assert_eq!(config.mode, Mode::ConfigDescriptor(ConfigIndex::Current));
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(parse(&["-a", "0"]).is_err());
        assert!(parse(&["-a", "128"]).is_err());
        assert!(parse(&["-c0"]).is_err());
        assert!(parse(&["-f", "256"]).is_err());
    }

    #[test]
    fn modes_are_exclusive() {
        assert!(parse(&["-s", "-e"]).is_err());
        assert!(parse(&["-c", "-f"]).is_err());
        assert_eq!(parse(&["-s"]).unwrap().mode, Mode::Stats);
        assert_eq!(parse(&["-e"]).unwrap().mode, Mode::DeviceDescriptor);
    }
}
