//! Wire-command handlers binding the RPC server to the core.
//!
//! Command content is whitespace-separated UTF-8 text (addresses accept
//! `0x` hex or decimal); replies are short strings, raw bytes for memory
//! reads, or JSON for structured results. Every handler locks the shared
//! debugger for its full duration, which keeps command execution
//! strictly sequential.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use nix::sys::mman::ProtFlags;
use nix::unistd::Pid;

use crate::breakpoint::{BreakpointCondition, HwBreakpointKind};
use crate::debugger::{Debugger, LaunchDescriptor};
use crate::elf::ElfResolver;
use crate::errors::{DebuggerError, Result};
use crate::procfs;
use crate::regs::{DbgSel, FprName, FprValue, GprName};
use crate::rpc::RpcServer;
use crate::Addr;

pub type SharedDebugger = Arc<Mutex<Debugger>>;

fn with_session<F>(session: &SharedDebugger, f: F) -> Result<Vec<u8>>
where
    F: FnOnce(&mut Debugger) -> Result<Vec<u8>>,
{
    let mut guard = match session.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    f(&mut guard)
}

fn text(content: &[u8]) -> Result<String> {
    String::from_utf8(content.to_vec())
        .map_err(|_| DebuggerError::MalformedCommand("content is not UTF-8".to_string()))
}

fn fields(content: &[u8]) -> Result<Vec<String>> {
    Ok(text(content)?
        .split_whitespace()
        .map(String::from)
        .collect())
}

fn arg<'a>(fields: &'a [String], index: usize, what: &str) -> Result<&'a str> {
    fields
        .get(index)
        .map(|s| s.as_str())
        .ok_or_else(|| DebuggerError::MalformedCommand(format!("missing argument: {what}")))
}

fn parse_u64(raw: &str) -> Result<u64> {
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => Ok(u64::from_str_radix(hex, 16)?),
        None => Ok(raw.parse()?),
    }
}

fn parse_u128(raw: &str) -> Result<u128> {
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => Ok(u128::from_str_radix(hex, 16)?),
        None => Ok(raw.parse()?),
    }
}

fn parse_u32(raw: &str) -> Result<u32> {
    let value = parse_u64(raw)?;
    u32::try_from(value)
        .map_err(|_| DebuggerError::InvalidArgument(format!("{raw} does not fit 32 bits")))
}

fn parse_addr(raw: &str) -> Result<Addr> {
    Ok(Addr::from(parse_u64(raw)?))
}

fn parse_pid(raw: &str) -> Result<Pid> {
    let value: i32 = raw.parse()?;
    if value <= 0 {
        return Err(DebuggerError::InvalidArgument(format!(
            "pid/tid must be positive, got {value}"
        )));
    }
    Ok(Pid::from_raw(value))
}

fn parse_prot(raw: &str) -> Result<ProtFlags> {
    let mut prot = ProtFlags::empty();
    for flag in raw.chars() {
        match flag {
            'r' => prot |= ProtFlags::PROT_READ,
            'w' => prot |= ProtFlags::PROT_WRITE,
            'x' => prot |= ProtFlags::PROT_EXEC,
            '-' => {}
            other => {
                return Err(DebuggerError::InvalidArgument(format!(
                    "unknown protection flag {other:?}"
                )))
            }
        }
    }
    Ok(prot)
}

fn decode_hex(raw: &str) -> Result<Vec<u8>> {
    if raw.len() % 2 != 0 {
        return Err(DebuggerError::MalformedCommand(
            "hex byte string has odd length".to_string(),
        ));
    }
    (0..raw.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&raw[i..i + 2], 16)
                .map_err(|_| DebuggerError::MalformedCommand(format!("bad hex byte in {raw:?}")))
        })
        .collect()
}

/// Compiles a `REG=VALUE` token into a condition over the GPR snapshot.
fn parse_condition(raw: &str) -> Result<BreakpointCondition> {
    let (register, value) = raw.split_once('=').ok_or_else(|| {
        DebuggerError::MalformedCommand(format!("condition {raw:?} is not REG=VALUE"))
    })?;
    let name = GprName::from_str(register)?;
    let expected = parse_u64(value)?;
    Ok(Arc::new(move |_tid, _addr, regs| regs.get(name) == expected))
}

fn lead_pid(debugger: &Debugger) -> Result<Pid> {
    debugger.pid().ok_or(DebuggerError::NoTarget)
}

/// Registers one handler per debugger operation on `server`.
pub fn register_default_handlers(server: &mut RpcServer, session: SharedDebugger) {
    macro_rules! handler {
        ($name:literal, |$dbg:ident, $args:ident| $body:block) => {{
            let session = session.clone();
            server.register(
                $name,
                Box::new(move |content: &[u8]| {
                    let $args = fields(content)?;
                    with_session(&session, |$dbg| $body)
                }),
            );
        }};
    }

    handler!("launch", |dbg, args| {
        let target = arg(&args, 0, "path or app:<package/activity>")?;
        let descriptor = match target.strip_prefix("app:") {
            Some(app) => LaunchDescriptor::app_from_target(app),
            None => LaunchDescriptor::Binary {
                path: PathBuf::from(target),
                argv: args[1..].to_vec(),
                envp: Vec::new(),
            },
        };
        let pid = dbg.launch(&descriptor)?;
        Ok(pid.to_string().into_bytes())
    });

    handler!("attach", |dbg, args| {
        let pid = parse_pid(arg(&args, 0, "pid")?)?;
        let count = dbg.attach(pid)?;
        Ok(count.to_string().into_bytes())
    });

    handler!("detach", |dbg, _args| {
        let count = dbg.detach()?;
        Ok(count.to_string().into_bytes())
    });

    handler!("run", |dbg, _args| {
        dbg.run()?;
        Ok(b"running".to_vec())
    });

    handler!("continue_wait", |dbg, _args| {
        let event = dbg.continue_until_stop()?;
        Ok(serde_json::to_vec(&event)?)
    });

    handler!("step", |dbg, args| {
        let tid = match args.first() {
            Some(raw) => Some(parse_pid(raw)?),
            None => None,
        };
        dbg.step_into(tid)?;
        Ok(b"stepped".to_vec())
    });

    handler!("step_over", |dbg, _args| {
        dbg.step_over()?;
        Ok(b"stepped".to_vec())
    });

    handler!("kill", |dbg, _args| {
        dbg.kill_target()?;
        Ok(b"ok".to_vec())
    });

    handler!("read_memory", |dbg, args| {
        let addr = parse_addr(arg(&args, 0, "address")?)?;
        let len = parse_u64(arg(&args, 1, "length")?)? as usize;
        let pid = lead_pid(dbg)?;
        let mut buf = vec![0u8; len];
        dbg.memory.read(pid, addr, &mut buf)?;
        Ok(buf)
    });

    handler!("write_memory", |dbg, args| {
        let addr = parse_addr(arg(&args, 0, "address")?)?;
        let bytes = decode_hex(arg(&args, 1, "hex bytes")?)?;
        let pid = lead_pid(dbg)?;
        dbg.memory.write(pid, addr, &bytes)?;
        Ok(bytes.len().to_string().into_bytes())
    });

    handler!("regions", |dbg, _args| {
        let pid = lead_pid(dbg)?;
        Ok(serde_json::to_vec(&dbg.memory.regions(pid)?)?)
    });

    handler!("search_memory", |dbg, args| {
        let pattern = decode_hex(arg(&args, 0, "hex pattern")?)?;
        let pid = lead_pid(dbg)?;
        Ok(serde_json::to_vec(&dbg.memory.search(pid, &pattern)?)?)
    });

    handler!("dump_memory", |dbg, args| {
        let lo = parse_addr(arg(&args, 0, "start address")?)?;
        let hi = parse_addr(arg(&args, 1, "end address")?)?;
        let path = arg(&args, 2, "output path")?;
        let pid = lead_pid(dbg)?;
        let written = dbg.memory.dump(pid, lo, hi, path)?;
        Ok(written.to_string().into_bytes())
    });

    handler!("alloc_memory", |dbg, args| {
        let size = parse_u64(arg(&args, 0, "size")?)?;
        let hint = match args.get(1) {
            Some(raw) => parse_addr(raw)?,
            None => Addr::NULL,
        };
        let prot = match args.get(2) {
            Some(raw) => parse_prot(raw)?,
            None => ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
        };
        let pid = lead_pid(dbg)?;
        let addr = dbg.memory.allocate(pid, size, hint, prot)?;
        Ok(format!("{addr}").into_bytes())
    });

    handler!("free_memory", |dbg, args| {
        let addr = parse_addr(arg(&args, 0, "address")?)?;
        let size = parse_u64(arg(&args, 1, "size")?)?;
        let pid = lead_pid(dbg)?;
        dbg.memory.free(pid, addr, size)?;
        Ok(b"ok".to_vec())
    });

    handler!("read_register", |dbg, args| {
        let (tid, name) = match args.len() {
            0 => return Err(DebuggerError::MalformedCommand("missing register".to_string())),
            1 => (lead_pid(dbg)?, args[0].as_str()),
            _ => (parse_pid(&args[0])?, args[1].as_str()),
        };

        if let Ok(gpr) = GprName::from_str(name) {
            let value = dbg.registers.get_gpr(tid, gpr)?;
            Ok(format!("{value:#x}").into_bytes())
        } else if let Ok(fpr) = FprName::from_str(name) {
            let value = dbg.registers.get_fpr(tid, fpr)?;
            Ok(value.to_string().into_bytes())
        } else if let Ok(sel) = DbgSel::from_str(name) {
            let (addr, ctrl) = dbg.registers.get_dbg(tid, sel)?;
            Ok(format!("{addr:#x} {ctrl:#x}").into_bytes())
        } else {
            Err(DebuggerError::UnknownRegister(name.to_string()))
        }
    });

    handler!("write_register", |dbg, args| {
        let (tid, name, values) = match args.len() {
            0 | 1 => {
                return Err(DebuggerError::MalformedCommand(
                    "usage: [tid] REGISTER VALUE [VALUE2]".to_string(),
                ))
            }
            2 => (lead_pid(dbg)?, args[0].as_str(), &args[1..]),
            _ => match parse_pid(&args[0]) {
                Ok(tid) => (tid, args[1].as_str(), &args[2..]),
                Err(_) => (lead_pid(dbg)?, args[0].as_str(), &args[1..]),
            },
        };
        let value = arg(values, 0, "value")?;

        if let Ok(gpr) = GprName::from_str(name) {
            dbg.registers.set_gpr(tid, gpr, parse_u64(value)?)?;
        } else if let Ok(fpr) = FprName::from_str(name) {
            let value = match fpr {
                FprName::V(_) => FprValue::Vector(parse_u128(value)?),
                _ => FprValue::Status(parse_u32(value)?),
            };
            dbg.registers.set_fpr(tid, fpr, value)?;
        } else if let Ok(sel) = DbgSel::from_str(name) {
            let addr = parse_u64(value)?;
            let ctrl = parse_u32(arg(values, 1, "control word")?)?;
            dbg.registers.set_dbg(tid, sel, addr, ctrl)?;
        } else {
            return Err(DebuggerError::UnknownRegister(name.to_string()));
        }
        Ok(b"ok".to_vec())
    });

    handler!("probe_hw_slots", |dbg, _args| {
        let pid = lead_pid(dbg)?;
        let count = dbg.breakpoints.probe_hw_slots(pid)?;
        Ok(count.to_string().into_bytes())
    });

    handler!("set_breakpoint", |dbg, args| {
        let tid = parse_pid(arg(&args, 0, "tid")?)?;
        let addr = parse_addr(arg(&args, 1, "address")?)?;
        let kind = arg(&args, 2, "kind (sw|hw-exec|hw-write|hw-rw)")?;
        let condition = match args.get(3) {
            Some(raw) => Some(parse_condition(raw)?),
            None => None,
        };

        let id = match kind {
            "sw" | "software" => dbg.breakpoints.set_software(tid, addr, condition)?,
            "hw-exec" => {
                dbg.breakpoints
                    .set_hardware(tid, addr, HwBreakpointKind::Execution, condition)?
            }
            "hw-write" => {
                dbg.breakpoints
                    .set_hardware(tid, addr, HwBreakpointKind::Write, condition)?
            }
            "hw-rw" => {
                dbg.breakpoints
                    .set_hardware(tid, addr, HwBreakpointKind::ReadWrite, condition)?
            }
            other => {
                return Err(DebuggerError::MalformedCommand(format!(
                    "unknown breakpoint kind {other:?}"
                )))
            }
        };
        Ok(id.to_string().into_bytes())
    });

    handler!("remove_breakpoint", |dbg, args| {
        let id = parse_u32(arg(&args, 0, "breakpoint id")?)?;
        dbg.breakpoints.remove(id)?;
        Ok(b"ok".to_vec())
    });

    handler!("enable_breakpoint", |dbg, args| {
        let id = parse_u32(arg(&args, 0, "breakpoint id")?)?;
        dbg.breakpoints.enable(id)?;
        Ok(b"ok".to_vec())
    });

    handler!("disable_breakpoint", |dbg, args| {
        let id = parse_u32(arg(&args, 0, "breakpoint id")?)?;
        dbg.breakpoints.disable(id)?;
        Ok(b"ok".to_vec())
    });

    handler!("list_breakpoints", |dbg, args| {
        let breakpoints = match args.first() {
            Some(raw) => dbg.breakpoints.by_tid(parse_pid(raw)?),
            None => dbg.breakpoints.all(),
        };
        Ok(serde_json::to_vec(&breakpoints)?)
    });

    handler!("disassemble", |dbg, args| {
        let addr = parse_addr(arg(&args, 0, "address")?)?;
        let pid = lead_pid(dbg)?;
        let insn = dbg.disassembler.instruction_at(&dbg.memory, pid, addr)?;
        Ok(serde_json::to_vec(&insn)?)
    });

    handler!("inject_elf", |dbg, args| {
        let path = arg(&args, 0, "image path")?;
        let preferred_base = match args.get(1) {
            Some(raw) => parse_addr(raw)?,
            None => Addr::NULL,
        };
        let resolver = ElfResolver::from_file(path)?;
        let image = dbg.inject_elf(&resolver, preferred_base, &Default::default())?;
        Ok(serde_json::to_vec(&image)?)
    });

    handler!("unload_elf", |dbg, args| {
        let base = parse_addr(arg(&args, 0, "load base")?)?;
        dbg.unload_image(base)?;
        Ok(b"ok".to_vec())
    });

    handler!("resolve_symbol", |dbg, args| {
        let name = arg(&args, 0, "symbol name")?;
        let addr = dbg.resolve_symbol(name)?;
        Ok(format!("{addr}").into_bytes())
    });

    handler!("threads", |dbg, _args| {
        let pid = lead_pid(dbg)?;
        let tids: Vec<i32> = procfs::thread_ids(pid)?
            .iter()
            .map(|tid| tid.as_raw())
            .collect();
        Ok(serde_json::to_vec(&tids)?)
    });

    handler!("status", |dbg, _args| {
        let state = dbg.pid().and_then(|pid| procfs::process_state(pid).ok());
        let status = serde_json::json!({
            "pid": dbg.pid().map(|pid| pid.as_raw()),
            "tids": dbg.tids().iter().map(|tid| tid.as_raw()).collect::<Vec<_>>(),
            "state": state,
            "images": dbg.images().values().map(|image| image.load_base).collect::<Vec<_>>(),
        });
        Ok(serde_json::to_vec(&status)?)
    });
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::regs::UserPtRegs;
    use crate::rpc::{read_frame, write_frame, Message};
    use std::net::{TcpListener, TcpStream};

    fn encode_hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn test_number_parsing() {
        assert_eq!(parse_u64("0x1000").unwrap(), 0x1000);
        assert_eq!(parse_u64("0X10").unwrap(), 0x10);
        assert_eq!(parse_u64("4096").unwrap(), 4096);
        assert!(parse_u64("zzz").is_err());
        assert_eq!(parse_u32("0xffffffff").unwrap(), u32::MAX);
        assert!(parse_u32("0x100000000").is_err());
    }

    #[test]
    fn test_pid_parsing() {
        assert_eq!(parse_pid("42").unwrap(), Pid::from_raw(42));
        assert!(parse_pid("0").is_err());
        assert!(parse_pid("-7").is_err());
        assert!(parse_pid("x").is_err());
    }

    #[test]
    fn test_hex_codec() {
        assert_eq!(decode_hex("48690000").unwrap(), vec![0x48, 0x69, 0, 0]);
        assert_eq!(encode_hex(&[0x48, 0x69, 0, 0]), "48690000");
        assert!(decode_hex("abc").is_err());
        assert!(decode_hex("zz").is_err());
        let bytes = vec![0xde, 0xad, 0xbe, 0xef];
        assert_eq!(decode_hex(&encode_hex(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn test_prot_parsing() {
        assert_eq!(
            parse_prot("rw").unwrap(),
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE
        );
        assert_eq!(
            parse_prot("r-x").unwrap(),
            ProtFlags::PROT_READ | ProtFlags::PROT_EXEC
        );
        assert!(parse_prot("q").is_err());
    }

    #[test]
    fn test_condition_compiles_and_evaluates() {
        let condition = parse_condition("x0=0xdeadbeef").unwrap();
        let mut regs = UserPtRegs::default();
        let tid = Pid::from_raw(1);
        let addr = Addr::from(0x1000u64);
        assert!(!condition(tid, addr, &regs));
        regs.regs[0] = 0xdead_beef;
        assert!(condition(tid, addr, &regs));

        assert!(parse_condition("x0").is_err());
        assert!(parse_condition("x99=1").is_err());
    }

    fn call(stream: &mut TcpStream, command: &str, content: &[u8]) -> Message {
        write_frame(stream, &Message::new(command, content.to_vec()).to_bytes()).unwrap();
        Message::from_bytes(&read_frame(stream).unwrap().unwrap()).unwrap()
    }

    #[test]
    fn test_wired_handlers_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let session = Arc::new(Mutex::new(Debugger::build().unwrap()));
            let mut server = RpcServer::build();
            register_default_handlers(&mut server, session);
            let _ = server.serve_listener(listener);
        });

        let mut stream = TcpStream::connect(addr).unwrap();

        let reply = call(&mut stream, "ping", b"");
        assert_eq!(reply.command, "success");
        assert_eq!(reply.content, b"pong");

        // no target yet: core commands surface errors through the wire
        let reply = call(&mut stream, "regions", b"");
        assert_eq!(reply.command, "error");

        let reply = call(&mut stream, "attach", b"not-a-pid");
        assert_eq!(reply.command, "error");

        let reply = call(&mut stream, "step_over", b"");
        assert_eq!(reply.command, "error");
        assert!(String::from_utf8_lossy(&reply.content).contains("not supported"));
    }
}
