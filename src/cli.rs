//! Line-based diagnostic commands.
//!
//! Every response is a block of `\r\n`-terminated lines ending with
//! `done`, or with `error\t<reason>` when the command failed, so a test
//! harness can split responses without knowing the command.

use crate::identity::{ExtAddr, ExtNetId, IdentityError};
use crate::node::{MeshNode, Mode, NodeError};
use std::fmt::Write;
use thiserror::Error;

/// Terminates a successful response.
pub const DONE: &str = "done";

/// Errors reported back on the command line.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("missing argument: {0}")]
    MissingArgument(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0}")]
    Identity(#[from] IdentityError),

    #[error("{0}")]
    Node(#[from] NodeError),
}

/// Run one command line against `node` and render the response.
pub fn execute(node: &mut MeshNode, line: &str) -> String {
    let args: Vec<&str> = line.split_whitespace().collect();
    let mut out = String::new();
    let result = match args.split_first() {
        None => Ok(()),
        Some((cmd, rest)) => run(node, cmd, rest, &mut out),
    };
    match result {
        Ok(()) => push_line(&mut out, DONE),
        Err(e) => push_line(&mut out, &format!("error\t{}", e)),
    }
    out
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push_str("\r\n");
}

fn run(node: &mut MeshNode, cmd: &str, args: &[&str], out: &mut String) -> Result<(), CliError> {
    match cmd {
        "status" => status(node, out),
        "nbrs" => neighbors(node, out),
        "whitelist" => whitelist(node, args, out)?,
        "extnetid" => extnetid(node, args, out)?,
        "mode" => mode(node, args, out)?,
        "routes" => routes(node, out),
        "start" => {
            let now = node.now_ms();
            node.start(now)?;
        }
        "stop" => node.stop()?,
        "help" => help(out),
        other => return Err(CliError::UnknownCommand(other.to_string())),
    }
    Ok(())
}

fn status(node: &MeshNode, out: &mut String) {
    push_line(out, &format!("state\t{}", node.device_state()));
    push_line(out, &format!("attach\t{}", node.attach_state()));
    push_line(out, "<<network wifi 0>>");
    push_line(out, &format!("\tnetid\t0x{:x}", node.netid().as_u16()));
    push_line(out, &format!("\tmac\t{}", node.ext_addr()));
    push_line(out, &format!("\tsid\t{}", node.sid()));
    push_line(out, &format!("\tnetsize\t{}", node.network_data().size()));
    push_line(out, &format!("\trouter\t{}", node.router().id()));
    push_line(out, &format!("\troutes\t{}", node.routes().len()));
    push_line(out, &format!("\tbcast_mtu\t{}", node.bcast_mtu()));
    push_line(out, &format!("\tucast_mtu\t{}", node.ucast_mtu()));
    push_line(out, &format!("uptime\t{}", node.uptime_ms() / 1000));
    push_line(out, &format!("channel\t{}", node.channel()));
}

fn neighbors(node: &MeshNode, out: &mut String) {
    let now = node.now_ms();
    push_line(out, "neighbors:");
    push_line(out, "\t<<hal type wifi>>");
    let mut count = 0;
    for n in node.neighbors().iter() {
        let mut line = String::new();
        let _ = write!(
            line,
            "\t{},{},0x{:x},0x{},{},{},{},{},{},{},{}",
            n.ext,
            n.state,
            n.netid.as_u16(),
            n.sid,
            n.link_cost,
            n.ssid.child_num,
            n.channel,
            n.reverse_rssi,
            n.forward_rssi,
            now.saturating_sub(n.last_heard_ms),
            u8::from(n.is_awake(now)),
        );
        push_line(out, &line);
        count += 1;
    }
    push_line(out, &format!("\tnum={}", count));
}

fn whitelist(node: &mut MeshNode, args: &[&str], out: &mut String) -> Result<(), CliError> {
    let list = node.security_mut().whitelist_mut();
    match args {
        [] => {
            let state = if list.is_enabled() { "enabled" } else { "disabled" };
            push_line(out, &format!("whitelist is {}, entries:", state));
            for (ext, _) in list.entries() {
                push_line(out, &format!("\t{}", ext));
            }
        }
        ["add", ext, rest @ ..] => {
            let ext: ExtAddr = ext.parse()?;
            let rssi = match rest.first() {
                Some(v) => Some(
                    v.parse::<i8>()
                        .map_err(|_| CliError::InvalidArgument(v.to_string()))?,
                ),
                None => None,
            };
            list.add(ext, rssi);
        }
        ["add"] => return Err(CliError::MissingArgument("ext address")),
        ["remove", ext] => {
            let ext: ExtAddr = ext.parse()?;
            if !list.remove(&ext) {
                return Err(CliError::InvalidArgument(format!("{} not listed", ext)));
            }
        }
        ["remove"] => return Err(CliError::MissingArgument("ext address")),
        ["clear"] => list.clear(),
        ["enable"] => list.set_enabled(true),
        ["disable"] => list.set_enabled(false),
        [other, ..] => return Err(CliError::InvalidArgument(other.to_string())),
    }
    Ok(())
}

fn extnetid(node: &mut MeshNode, args: &[&str], out: &mut String) -> Result<(), CliError> {
    match args.first() {
        None => push_line(out, &node.ext_netid().to_string()),
        Some(value) => {
            let id: ExtNetId = value.parse()?;
            node.set_ext_netid(id)?;
        }
    }
    Ok(())
}

fn mode(node: &mut MeshNode, args: &[&str], out: &mut String) -> Result<(), CliError> {
    if args.is_empty() {
        push_line(out, &node.mode().to_string());
        return Ok(());
    }
    // Flags adjust the current mode; `none` clears it and ends the list.
    let mut mode = node.mode();
    for flag in args {
        match *flag {
            "none" | "NONE" => {
                mode = Mode::NONE;
                break;
            }
            "LEADER" => mode.insert(Mode::LEADER),
            "SUPER" => mode.insert(Mode::SUPER),
            "ROUTER" => mode.remove(Mode::SUPER),
            "RX_ON" => mode.insert(Mode::RX_ON),
            "RX_OFF" => mode.remove(Mode::RX_ON),
            "MOBILE" => mode.insert(Mode::MOBILE),
            "FIXED" => mode.remove(Mode::MOBILE),
            other => match other.parse::<u8>() {
                Ok(bits) => mode = Mode::from_bits(bits),
                Err(_) => return Err(CliError::InvalidArgument(other.to_string())),
            },
        }
    }
    node.set_mode(mode);
    Ok(())
}

fn routes(node: &MeshNode, out: &mut String) {
    push_line(out, "routes:");
    for entry in node.routes().iter() {
        push_line(out, &format!("\t{}", entry));
    }
}

fn help(out: &mut String) {
    const COMMANDS: [(&str, &str); 9] = [
        ("status", "role, addresses and counters"),
        ("nbrs", "neighbor table"),
        ("whitelist [add <ext> [rssi]|remove <ext>|clear|enable|disable]", "link whitelist"),
        ("extnetid [<12 hex>]", "show or change the extended network id"),
        ("mode [<flag>...]", "show or adjust none|LEADER|SUPER|ROUTER|RX_ON|RX_OFF|MOBILE|FIXED"),
        ("routes", "route table"),
        ("start", "start the interface"),
        ("stop", "stop the interface"),
        ("help", "this list"),
    ];
    for (usage, what) in COMMANDS {
        push_line(out, &format!("{}\t{}", usage, what));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::hal::mock::{MockHal, MockIpAdapter};

    fn node() -> MeshNode {
        let ext: ExtAddr = "0102030405060708".parse().unwrap();
        let mut config = Config::new();
        config.node.mode.rx_on = true;
        config.node.mode.super_capable = true;
        MeshNode::new(
            config,
            Box::new(MockHal::new(ext, 127)),
            Box::new(MockIpAdapter::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_status_lines() {
        let mut node = node();
        let out = execute(&mut node, "status");
        assert!(out.starts_with("state\tdisabled\r\n"));
        assert!(out.contains("\tmac\t0102030405060708\r\n"));
        assert!(out.contains("\tsid\tfffe\r\n"));
        assert!(out.contains("\trouter\tSID_ROUTER\r\n"));
        assert!(out.contains("\tbcast_mtu\t127\r\n"));
        assert!(out.ends_with("done\r\n"));
    }

    #[test]
    fn test_unknown_command_reports_error() {
        let mut node = node();
        let out = execute(&mut node, "frobnicate now");
        assert_eq!(out, "error\tunknown command: frobnicate\r\n");
    }

    #[test]
    fn test_empty_line_is_done() {
        let mut node = node();
        assert_eq!(execute(&mut node, "   "), "done\r\n");
    }

    #[test]
    fn test_whitelist_add_list_clear() {
        let mut node = node();
        assert_eq!(execute(&mut node, "whitelist add 1111111111111111 -40"), "done\r\n");
        assert_eq!(execute(&mut node, "whitelist enable"), "done\r\n");
        let out = execute(&mut node, "whitelist");
        assert_eq!(
            out,
            "whitelist is enabled, entries:\r\n\t1111111111111111\r\ndone\r\n"
        );
        execute(&mut node, "whitelist clear");
        let out = execute(&mut node, "whitelist");
        assert!(out.starts_with("whitelist is enabled, entries:\r\ndone"));
    }

    #[test]
    fn test_whitelist_rejects_bad_address() {
        let mut node = node();
        let out = execute(&mut node, "whitelist add zz");
        assert!(out.starts_with("error\t"));
        let out = execute(&mut node, "whitelist remove 1111111111111111");
        assert!(out.starts_with("error\tinvalid argument"));
    }

    #[test]
    fn test_extnetid_set_and_show() {
        let mut node = node();
        assert_eq!(execute(&mut node, "extnetid a1a2a3a4a5a6"), "done\r\n");
        assert_eq!(execute(&mut node, "extnetid"), "a1a2a3a4a5a6\r\ndone\r\n");
        assert!(execute(&mut node, "extnetid 0102").starts_with("error\t"));
    }

    #[test]
    fn test_mode_flags() {
        let mut node = node();
        assert_eq!(execute(&mut node, "mode"), "SUPER|RX_ON\r\ndone\r\n");
        execute(&mut node, "mode ROUTER MOBILE");
        assert_eq!(node.mode(), Mode::RX_ON | Mode::MOBILE);
        execute(&mut node, "mode FIXED LEADER");
        assert_eq!(node.mode(), Mode::RX_ON | Mode::LEADER);
        execute(&mut node, "mode none SUPER");
        assert_eq!(node.mode(), Mode::NONE);
        execute(&mut node, "mode 5");
        assert_eq!(node.mode(), Mode::SUPER | Mode::RX_ON);
        assert!(execute(&mut node, "mode TURBO").starts_with("error\t"));
    }

    #[test]
    fn test_mode_flag_keeps_receiver_on() {
        let mut config = Config::new();
        config.node.mode.rx_on = true;
        let mut node = MeshNode::new(
            config,
            Box::new(MockHal::new(ExtAddr::from_u64(1), 127)),
            Box::new(MockIpAdapter::new()),
        )
        .unwrap();
        assert_eq!(execute(&mut node, "mode SUPER"), "done\r\n");
        assert_eq!(node.mode(), Mode::SUPER | Mode::RX_ON);
        assert!(!node.mode().is_sleepy());
    }

    #[test]
    fn test_start_stop() {
        let mut node = node();
        assert_eq!(execute(&mut node, "stop"), "error\tnode not started\r\n");
        assert_eq!(execute(&mut node, "start"), "done\r\n");
        assert!(execute(&mut node, "status").starts_with("state\tdetached\r\n"));
        assert_eq!(execute(&mut node, "start"), "error\tnode already started\r\n");
        assert_eq!(execute(&mut node, "stop"), "done\r\n");
        assert!(execute(&mut node, "nbrs").contains("\tnum=0\r\n"));
    }
}
