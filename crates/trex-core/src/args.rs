//! Translation of [`TrexOpts`] into the generator's command line.

use std::path::Path;

use crate::opts::{Iom, SharedObject, TrexOpts, Verbose};

/// How an option field turns into arguments.
#[derive(Clone, Copy)]
enum Kind {
    /// Always emitted as is.
    Fixed,
    /// A flag emitted when the field is set.
    Bool(fn(&TrexOpts) -> bool),
    /// A flag followed by an unsigned value.
    Uint(fn(&TrexOpts) -> Option<u32>),
    /// A flag followed by a decimal value.
    Double(fn(&TrexOpts) -> Option<f64>),
    /// A flag followed by a string.
    Str(fn(&TrexOpts) -> Option<&str>),
    /// A flag followed by the mapped value of an enum field.
    Enum(fn(&TrexOpts) -> Option<&'static str>),
    /// Flags chosen by an enum field, emitted without the bind's own flag.
    Flags(fn(&TrexOpts) -> &'static [&'static str]),
}

#[derive(Clone, Copy)]
struct OptBind {
    flag: &'static str,
    kind: Kind,
}

const fn bind(flag: &'static str, kind: Kind) -> OptBind {
    OptBind { flag, kind }
}

/// Command-line bindings, in argument order.
const ARG_BINDS: &[OptBind] = &[
    bind("-f", Kind::Fixed),
    bind("default.py", Kind::Fixed),
    bind("--astf", Kind::Fixed),
    bind("--astf-server-only", Kind::Bool(|o| o.astf_server_only)),
    bind("-c", Kind::Uint(|o| o.n_threads)),
    bind("--tso-disable", Kind::Bool(|o| o.tso_disable)),
    bind("--lro-disable", Kind::Bool(|o| o.lro_disable)),
    bind("-d", Kind::Double(|o| o.duration)),
    bind("--flip", Kind::Bool(|o| o.asymmetric_traffic_flow)),
    bind("--hdrh", Kind::Bool(|o| o.use_hdr_histograms)),
    bind("--ipv6", Kind::Bool(|o| o.ipv6)),
    bind("-m", Kind::Uint(|o| o.rate_multiplier)),
    bind("--nc", Kind::Bool(|o| o.force_close_at_end)),
    bind("--no-flow-control-change", Kind::Bool(|o| o.enable_flow_control)),
    bind("--no-watchdog", Kind::Bool(|o| o.no_watchdog)),
    bind("--rt", Kind::Bool(|o| o.use_realtime_prio)),
    bind("-pubd", Kind::Bool(|o| o.no_monitors)),
    bind("--queue-drop", Kind::Bool(|o| o.dont_resend_pkts)),
    bind("--sleeps", Kind::Bool(|o| o.use_sleep)),
    bind("-v", Kind::Enum(|o| o.verbose.map(verbose_arg))),
    bind("--iom", Kind::Enum(|o| o.iom.map(iom_arg))),
    bind("so", Kind::Flags(|o| o.so.map(so_flags).unwrap_or_default())),
    bind("-w", Kind::Uint(|o| o.init_wait_sec)),
    bind("--prefix", Kind::Str(TrexOpts::prefix)),
];

fn verbose_arg(v: Verbose) -> &'static str {
    match v {
        Verbose::Min => "1",
        Verbose::Max => "3",
    }
}

fn iom_arg(iom: Iom) -> &'static str {
    match iom {
        Iom::Silent => "0",
        Iom::Normal => "1",
        Iom::Short => "2",
    }
}

fn so_flags(so: SharedObject) -> &'static [&'static str] {
    match so {
        SharedObject::Mlx4 => &["--mlx4-so"],
        SharedObject::Mlx5 => &["--mlx5-so"],
        SharedObject::Mlx4Mlx5 => &["--mlx4-so", "--mlx5-so"],
        SharedObject::Ntacc => &["--ntacc-so"],
        SharedObject::Bnxt => &["--bnxt-so"],
    }
}

impl OptBind {
    fn render(&self, opts: &TrexOpts, argv: &mut Vec<String>) {
        let value = match self.kind {
            Kind::Fixed => {
                argv.push(self.flag.to_owned());
                return;
            }
            Kind::Bool(get) => {
                if get(opts) {
                    argv.push(self.flag.to_owned());
                }
                return;
            }
            Kind::Flags(get) => {
                argv.extend(get(opts).iter().map(|&f| f.to_owned()));
                return;
            }
            Kind::Uint(get) => get(opts).map(|v| v.to_string()),
            Kind::Double(get) => get(opts).map(|v| v.to_string()),
            Kind::Str(get) => get(opts).map(str::to_owned),
            Kind::Enum(get) => get(opts).map(str::to_owned),
        };
        if let Some(value) = value {
            argv.push(self.flag.to_owned());
            argv.push(value);
        }
    }
}

/// Builds the generator's argument vector. `argv[0]` is the executable and the vector always
/// ends with `--cfg <cfg_path>`.
pub(crate) fn build_args(opts: &TrexOpts, cfg_path: &Path) -> Vec<String> {
    let mut argv = vec![opts.exec.display().to_string()];
    for bind in ARG_BINDS {
        bind.render(opts, &mut argv);
    }
    argv.push("--cfg".to_owned());
    argv.push(cfg_path.display().to_string());
    argv
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn opts() -> TrexOpts {
        TrexOpts::builder()
            .exec("/opt/trex/t-rex-64")
            .astf_template("{}")
            .build()
    }

    #[test]
    fn minimal_command_line() {
        let argv = build_args(&opts(), Path::new("/tmp/abc.yaml"));
        insta::assert_snapshot!(argv.join(" "), @"/opt/trex/t-rex-64 -f default.py --astf --cfg /tmp/abc.yaml");
    }

    #[test]
    fn scalars_render_in_decimal() {
        let opts = TrexOpts {
            duration: Some(5.0),
            rate_multiplier: Some(1),
            ..opts()
        };
        let argv = build_args(&opts, Path::new("/tmp/abc.yaml"));
        insta::assert_snapshot!(argv.join(" "), @"/opt/trex/t-rex-64 -f default.py --astf -d 5 -m 1 --cfg /tmp/abc.yaml");
        let opts = TrexOpts {
            duration: Some(0.0),
            ..self::opts()
        };
        let argv = build_args(&opts, Path::new("/tmp/abc.yaml"));
        assert!(argv.windows(2).any(|w| w == ["-d", "0"]));
        let opts = TrexOpts {
            duration: Some(2.5),
            ..self::opts()
        };
        let argv = build_args(&opts, Path::new("/tmp/abc.yaml"));
        assert!(argv.windows(2).any(|w| w == ["-d", "2.5"]));
    }

    #[test]
    fn empty_prefix_is_unset() {
        let opts = TrexOpts {
            instance_prefix: Some(String::new()),
            ..opts()
        };
        assert_eq!(opts.prefix(), None);
        let argv = build_args(&opts, Path::new("/tmp/abc.yaml"));
        assert!(!argv.iter().any(|arg| arg == "--prefix"));
        assert_eq!(
            crate::config::astf_path(opts.prefix()),
            Path::new("/tmp/astf.json")
        );
    }

    #[test]
    fn enums_and_flags() {
        let opts = TrexOpts {
            astf_server_only: true,
            verbose: Some(Verbose::Max),
            iom: Some(Iom::Normal),
            so: Some(SharedObject::Mlx4Mlx5),
            instance_prefix: Some("trex0".into()),
            no_monitors: true,
            ..opts()
        };
        let argv = build_args(&opts, Path::new("/tmp/abc.yaml"));
        insta::assert_snapshot!(argv.join(" "), @"/opt/trex/t-rex-64 -f default.py --astf --astf-server-only -pubd -v 3 --iom 1 --mlx4-so --mlx5-so --prefix trex0 --cfg /tmp/abc.yaml");
    }

    // Parses an argument vector back using the same bindings.
    fn parse_back(argv: &[String]) -> HashMap<&'static str, Option<String>> {
        let mut parsed = HashMap::new();
        let mut args = argv[1..argv.len() - 2].iter();
        while let Some(arg) = args.next() {
            let bind = ARG_BINDS
                .iter()
                .find(|b| b.flag == arg.as_str())
                .or_else(|| ARG_BINDS.iter().find(|b| matches!(b.kind, Kind::Flags(_))));
            let Some(bind) = bind else {
                panic!("unknown argument {arg}");
            };
            match bind.kind {
                Kind::Fixed | Kind::Bool(_) => {
                    parsed.insert(bind.flag, None);
                }
                Kind::Flags(_) => {
                    let entry = parsed.entry(bind.flag).or_insert_with(|| Some(String::new()));
                    if let Some(s) = entry {
                        s.push_str(arg);
                    }
                }
                _ => {
                    parsed.insert(bind.flag, args.next().cloned());
                }
            }
        }
        parsed
    }

    #[test]
    fn every_bound_field_round_trips() {
        let opts = TrexOpts {
            astf_server_only: true,
            n_threads: Some(4),
            tso_disable: true,
            lro_disable: true,
            duration: Some(12.25),
            asymmetric_traffic_flow: true,
            use_hdr_histograms: true,
            ipv6: true,
            rate_multiplier: Some(100),
            force_close_at_end: true,
            enable_flow_control: true,
            no_watchdog: true,
            use_realtime_prio: true,
            no_monitors: true,
            dont_resend_pkts: true,
            use_sleep: true,
            verbose: Some(Verbose::Min),
            iom: Some(Iom::Short),
            so: Some(SharedObject::Bnxt),
            init_wait_sec: Some(3),
            instance_prefix: Some("p1".into()),
            ..opts()
        };
        let argv = build_args(&opts, Path::new("/tmp/x.yaml"));
        assert_eq!(argv[0], "/opt/trex/t-rex-64");
        assert_eq!(argv[argv.len() - 2..], ["--cfg", "/tmp/x.yaml"]);
        let parsed = parse_back(&argv);
        // Every binding is present exactly as set.
        assert_eq!(parsed.len(), ARG_BINDS.len());
        let value = |flag: &str| parsed.get(flag).cloned().flatten();
        assert_eq!(value("-c").and_then(|v| v.parse().ok()), opts.n_threads);
        assert_eq!(value("-d").and_then(|v| v.parse().ok()), opts.duration);
        assert_eq!(value("-m").and_then(|v| v.parse().ok()), opts.rate_multiplier);
        assert_eq!(value("-w").and_then(|v| v.parse().ok()), opts.init_wait_sec);
        assert_eq!(value("-v").as_deref(), Some("1"));
        assert_eq!(value("--iom").as_deref(), Some("2"));
        assert_eq!(value("so").as_deref(), Some("--bnxt-so"));
        assert_eq!(value("--prefix"), opts.instance_prefix);
    }
}
