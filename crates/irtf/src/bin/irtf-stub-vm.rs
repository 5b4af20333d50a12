//! Stand-in for the VM executable, used by the integration tests.
//!
//! Invoked with the flag VM main class on the command line it answers the flag request;
//! otherwise it behaves as the test VM. Behavior is steered with `-DStub.*` properties, which
//! reach both children because they travel as framework or scenario flags:
//!
//! - `-DStub.trace=<file>`: append `flag|test <args>` per launch.
//! - `-DStub.flagMode=disable|malformed|silent|fail`: flag VM answer variants.
//! - `-DStub.log=<file>`: copied to `hotspot_pid<pid>.log` in the working directory.
//! - `-DStub.encoding=m,1;n,1,2`: rule encoding sent on the channel.
//! - `-DStub.exit=<code>`, `-DStub.stdout=<text>`, `-DStub.stderrFile=<file>`.
//! - `-DStub.noTests`: fail the way a test VM with an empty test selection does.

use std::collections::BTreeMap;
use std::io::Write as _;

use anyhow::{Context, Result};
use irtf::channel::send;
use irtf::flags::{render_flag_vm_answer, FlagVmAnswer};
use irtf::ir::encoding::{MethodEncoding, RuleEncoding};
use irtf_contracts::{
    hotspot_log_file_name, DEFAULT_FLAG_VM_MAIN, NO_TESTS_RUN_MARKER, SERVER_PORT_PROPERTY,
};

struct StubArgs {
    args: Vec<String>,
    props: BTreeMap<String, String>,
    port: Option<u16>,
}

impl StubArgs {
    fn parse(args: Vec<String>) -> Result<Self> {
        let port_prefix = format!("-D{SERVER_PORT_PROPERTY}=");
        let mut props = BTreeMap::new();
        let mut port = None;
        for a in &args {
            if let Some(p) = a.strip_prefix(&port_prefix) {
                port = Some(p.parse::<u16>().with_context(|| format!("bad port {p:?}"))?);
            } else if let Some(prop) = a.strip_prefix("-DStub.") {
                let (k, v) = prop.split_once('=').unwrap_or((prop, ""));
                props.insert(k.to_string(), v.to_string());
            }
        }
        Ok(Self { args, props, port })
    }

    fn prop(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(String::as_str)
    }

    fn is_flag_vm(&self) -> bool {
        self.args.iter().any(|a| a == DEFAULT_FLAG_VM_MAIN)
    }

    fn send(&self, payload: &str) -> Result<()> {
        let port = self.port.context("missing channel port property")?;
        send(port, payload).with_context(|| format!("send to port {port}"))
    }
}

fn trace(args: &StubArgs) -> Result<()> {
    let Some(path) = args.prop("trace") else {
        return Ok(());
    };
    let role = if args.is_flag_vm() { "flag" } else { "test" };
    let mut f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open trace: {path}"))?;
    writeln!(f, "{role} {}", args.args.join(" "))?;
    Ok(())
}

fn run_flag_vm(args: &StubArgs) -> Result<i32> {
    let answer = FlagVmAnswer {
        should_verify_ir: args.prop("flagMode") != Some("disable"),
        test_vm_flags: vec!["-XX:+PrintIdeal".to_string()],
    };
    match args.prop("flagMode") {
        Some("fail") => {
            eprintln!("Error: could not create the flag VM");
            return Ok(1);
        }
        Some("silent") => {}
        Some("malformed") => args.send("no flags here\n")?,
        _ => args.send(&render_flag_vm_answer(&answer))?,
    }
    Ok(0)
}

fn encoding_from(spec: &str) -> RuleEncoding {
    let methods = spec
        .split(';')
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let mut parts = entry.split(',');
            let method = parts.next().unwrap_or_default().to_string();
            let rules = parts.filter_map(|p| p.parse::<u32>().ok()).collect();
            MethodEncoding { method, rules }
        })
        .collect();
    RuleEncoding { methods }
}

fn run_test_vm(args: &StubArgs) -> Result<i32> {
    if let Some(log) = args.prop("log") {
        let dest = hotspot_log_file_name(std::process::id());
        std::fs::copy(log, &dest).with_context(|| format!("copy log {log}"))?;
    }
    if let Some(text) = args.prop("stdout") {
        println!("{text}");
    }
    if args.props.contains_key("noTests") {
        eprintln!("Exception in thread \"main\" {NO_TESTS_RUN_MARKER}");
        return Ok(1);
    }
    if let Some(path) = args.prop("stderrFile") {
        let text = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
        eprint!("{text}");
    }

    let mut payload = String::from("[STDOUT] Stub test VM running\n");
    if let Some(spec) = args.prop("encoding") {
        payload.push_str(&encoding_from(spec).render());
    }
    if args.port.is_some() {
        args.send(&payload)?;
    }

    match args.prop("exit") {
        Some(code) => code.parse::<i32>().with_context(|| format!("bad exit code {code:?}")),
        None => Ok(0),
    }
}

fn run() -> Result<i32> {
    let args = StubArgs::parse(std::env::args().skip(1).collect())?;
    trace(&args)?;
    if args.is_flag_vm() {
        run_flag_vm(&args)
    } else {
        run_test_vm(&args)
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("irtf-stub-vm: {err:#}");
            std::process::exit(70);
        }
    }
}
