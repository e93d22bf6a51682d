//! Top-level lifecycle controller over the traced target.
//!
//! The controller owns the target identity (one PID plus the set of
//! traced TIDs) and the component instances that collaborate on it. A
//! target comes into existence through [`Debugger::launch`] or
//! [`Debugger::attach`] and goes away on detach or exit.

use std::collections::HashMap;
use std::ffi::CString;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread::sleep;
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus};
use nix::unistd::{execve, fork, ForkResult, Pid};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::breakpoint::{Breakpoint, BreakpointId, BreakpointManager};
use crate::disassemble::Disassembler;
use crate::errors::{DebuggerError, Result};
use crate::loader::{ElfLoader, LoadedImage, SymbolTable};
use crate::memory::MemoryController;
use crate::procfs::{self, MatchMode};
use crate::regs::RegisterController;
use crate::{tracer, Addr};

/// Bounded polling windows of the app-launch flow: up to 20 x 100 ms for
/// the shell helper, then up to 10 x 100 ms for the app-process search.
const HELPER_POLLS: u32 = 20;
const APP_SEARCH_POLLS: u32 = 10;
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How the target comes into existence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchDescriptor {
    /// Fork, trace and exec a binary. `argv` does not include the
    /// executable itself; an empty `envp` means the debugger's own
    /// environment.
    Binary {
        path: PathBuf,
        argv: Vec<String>,
        envp: Vec<String>,
    },
    /// Start an Android application with the debug-wait flag and attach
    /// to it once it stops.
    App { package: String, activity: String },
}

impl LaunchDescriptor {
    /// Builds an [`LaunchDescriptor::App`] from a `package/activity`
    /// string. The activity keeps its leading slash so the activity
    /// manager accepts the component as-is; a missing separator leaves
    /// the activity empty.
    pub fn app_from_target(target: &str) -> Self {
        match target.find('/') {
            Some(split) => LaunchDescriptor::App {
                package: target[..split].to_string(),
                activity: target[split..].to_string(),
            },
            None => {
                warn!("no package separator in {target:?}, leaving the activity empty");
                LaunchDescriptor::App {
                    package: target.to_string(),
                    activity: String::new(),
                }
            }
        }
    }

    /// The activity-manager command line that starts the app in
    /// debug-wait mode.
    pub fn am_command(&self) -> Option<String> {
        match self {
            LaunchDescriptor::App { package, activity } if !package.is_empty() => Some(format!(
                "am start -D -n {package}{activity} \
                 -a android.intent.action.MAIN -c android.intent.category.LAUNCHER"
            )),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct Target {
    pid: Pid,
    tids: Vec<Pid>,
    /// Launched targets may be killed on teardown; attached ones are
    /// only ever detached.
    launched: bool,
}

/// One observed stop of the target, as reported to the controller's
/// caller.
#[derive(Debug, Clone, Serialize)]
pub struct StopEvent {
    pub tid: i32,
    pub pc: Option<Addr>,
    pub signal: Option<String>,
    pub breakpoint: Option<BreakpointId>,
    pub exit_code: Option<i32>,
}

impl StopEvent {
    fn at(tid: Pid, pc: Addr) -> Self {
        StopEvent {
            tid: tid.as_raw(),
            pc: Some(pc),
            signal: None,
            breakpoint: None,
            exit_code: None,
        }
    }
}

/// Top-level debugger over one target process.
pub struct Debugger {
    target: Option<Target>,
    pub memory: MemoryController,
    pub registers: RegisterController,
    pub breakpoints: BreakpointManager,
    pub disassembler: Disassembler,
    pub loader: ElfLoader,
    images: HashMap<u64, LoadedImage>,
}

impl Debugger {
    pub fn build() -> Result<Self> {
        let memory = MemoryController::new();
        let registers = RegisterController::new();
        Ok(Debugger {
            target: None,
            memory,
            registers,
            breakpoints: BreakpointManager::new(memory, registers),
            disassembler: Disassembler::new(),
            loader: ElfLoader::new(memory),
            images: HashMap::new(),
        })
    }

    pub fn pid(&self) -> Option<Pid> {
        self.target.as_ref().map(|t| t.pid)
    }

    pub fn tids(&self) -> &[Pid] {
        self.target.as_ref().map(|t| t.tids.as_slice()).unwrap_or(&[])
    }

    pub fn images(&self) -> &HashMap<u64, LoadedImage> {
        &self.images
    }

    fn target(&self) -> Result<&Target> {
        self.target.as_ref().ok_or(DebuggerError::NoTarget)
    }

    /// Brings a target under trace according to `descriptor`.
    pub fn launch(&mut self, descriptor: &LaunchDescriptor) -> Result<Pid> {
        if self.target.is_some() {
            return Err(DebuggerError::AlreadyTracing);
        }
        match descriptor {
            LaunchDescriptor::Binary { path, argv, envp } => self.launch_binary(path, argv, envp),
            LaunchDescriptor::App { .. } => self.launch_app(descriptor),
        }
    }

    fn launch_binary(&mut self, path: &PathBuf, argv: &[String], envp: &[String]) -> Result<Pid> {
        if !path.exists() {
            let err = DebuggerError::ExecutableDoesNotExist(path.to_string_lossy().to_string());
            error!("{err}");
            return Err(err);
        }
        if !path.is_file() {
            let err = DebuggerError::ExecutableIsNotAFile(path.to_string_lossy().to_string());
            error!("{err}");
            return Err(err);
        }

        // every CString is prepared before the fork; the child only execs
        let exec_path = CString::new(path.to_string_lossy().to_string())?;
        let mut args = vec![exec_path.clone()];
        for arg in argv {
            args.push(CString::new(arg.as_str())?);
        }
        let env: Vec<CString> = if envp.is_empty() {
            std::env::vars()
                .map(|(key, value)| CString::new(format!("{key}={value}")))
                .collect::<std::result::Result<_, _>>()?
        } else {
            envp.iter()
                .map(|entry| CString::new(entry.as_str()))
                .collect::<std::result::Result<_, _>>()?
        };

        match unsafe { fork() } {
            Err(e) => {
                error!("could not fork for {}: {e}", path.display());
                Err(e.into())
            }
            Ok(ForkResult::Parent { child }) => {
                match tracer::wait(child, None)? {
                    WaitStatus::Stopped(..) => {}
                    other => {
                        return Err(DebuggerError::LaunchFailed(format!(
                            "child did not reach the exec stop: {other:?}"
                        )))
                    }
                }
                tracer::set_default_options(child)?;
                self.target = Some(Target {
                    pid: child,
                    tids: vec![child],
                    launched: true,
                });
                info!("launched {} as pid {child}", path.display());
                Ok(child)
            }
            Ok(ForkResult::Child) => {
                if let Err(e) = tracer::traceme() {
                    eprintln!("traceme failed: {e}");
                }
                let result = execve(&exec_path, &args, &env);
                if let Err(Errno::ETXTBSY) = result {
                    // the executable is briefly busy; retry once
                    sleep(Duration::from_millis(50));
                    let _ = execve(&exec_path, &args, &env);
                }
                eprintln!("execve of {} failed", path.display());
                std::process::exit(127);
            }
        }
    }

    fn launch_app(&mut self, descriptor: &LaunchDescriptor) -> Result<Pid> {
        let LaunchDescriptor::App { package, .. } = descriptor else {
            unreachable!("launch_app only handles App descriptors");
        };
        let am_command = descriptor.am_command().ok_or_else(|| {
            DebuggerError::InvalidArgument("app launch needs a package name".to_string())
        })?;

        info!("starting app via: {am_command}");
        let mut helper = Command::new("sh")
            .arg("-c")
            .arg(&am_command)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let mut helper_done = false;
        for _ in 0..HELPER_POLLS {
            if helper.try_wait()?.is_some() {
                helper_done = true;
                break;
            }
            sleep(POLL_INTERVAL);
        }

        let mut found = None;
        for _ in 0..APP_SEARCH_POLLS {
            for pid in procfs::find_processes(package, MatchMode::Sensitive)? {
                let stopped = procfs::process_state(pid)
                    .map(|state| state.is_stopped())
                    .unwrap_or(false);
                if stopped {
                    found = Some(pid);
                    break;
                }
            }
            if found.is_some() {
                break;
            }
            sleep(POLL_INTERVAL);
        }

        // the app process is distinct from the shell helper; the helper
        // goes away no matter how the search ended
        if !helper_done {
            let _ = helper.kill();
        }
        let _ = helper.wait();

        let pid = found.ok_or_else(|| {
            error!("no stopped process of {package} appeared");
            DebuggerError::ProcessNotFound(package.clone())
        })?;
        self.attach(pid)?;
        Ok(pid)
    }

    /// Attaches to every thread of `pid`. Succeeds if at least one
    /// thread is brought under trace.
    pub fn attach(&mut self, pid: Pid) -> Result<usize> {
        if self.target.is_some() {
            return Err(DebuggerError::AlreadyTracing);
        }
        if pid.as_raw() <= 0 {
            return Err(DebuggerError::InvalidArgument(format!("invalid pid {pid}")));
        }

        let tids = procfs::thread_ids(pid)?;
        let mut attached = Vec::new();
        for tid in tids {
            if let Err(e) = tracer::attach(tid) {
                warn!("attaching to thread {tid} failed: {e}");
                continue;
            }
            match tracer::wait_for_stop(tid, Some(WaitPidFlag::__WALL)) {
                Ok(_) => {
                    if let Err(e) = tracer::set_default_options(tid) {
                        warn!("setting trace options on thread {tid} failed: {e}");
                        continue;
                    }
                    debug!("attached to thread {tid}");
                    attached.push(tid);
                }
                Err(e) => warn!("thread {tid} did not stop after attach: {e}"),
            }
        }

        if attached.is_empty() {
            return Err(DebuggerError::AttachFailed(pid.as_raw()));
        }
        let count = attached.len();
        self.target = Some(Target {
            pid,
            tids: attached,
            launched: false,
        });
        info!("attached to {count} thread(s) of process {pid}");
        Ok(count)
    }

    /// Detaches every traced thread. On partial failure the target
    /// state is retained so the remaining threads can be detached again.
    pub fn detach(&mut self) -> Result<usize> {
        let target = self.target()?;
        let total = target.tids.len();
        debug!("detaching from {} ({total} thread(s))", target.pid);

        let mut done = 0;
        for tid in &target.tids {
            match tracer::detach(*tid) {
                Ok(()) => done += 1,
                Err(e) => warn!("detaching thread {tid} failed: {e}"),
            }
        }

        if done == total {
            self.target = None;
            self.images.clear();
            info!("detached from all threads");
            Ok(done)
        } else {
            warn!("partial detach: {done}/{total} threads");
            Err(DebuggerError::DetachIncomplete { done, total })
        }
    }

    /// Resumes every traced thread. Succeeds if any continue succeeds.
    pub fn run(&self) -> Result<()> {
        let target = self.target()?;
        let mut any = false;
        for tid in &target.tids {
            match tracer::cont(*tid) {
                Ok(()) => any = true,
                Err(e) => warn!("continuing thread {tid} failed: {e}"),
            }
        }
        if any {
            Ok(())
        } else {
            Err(DebuggerError::ResumeFailed)
        }
    }

    /// Single-steps one thread (the lead thread by default) and waits
    /// for the follow-up stop.
    pub fn step_into(&self, tid: Option<Pid>) -> Result<()> {
        let target = self.target()?;
        let tid = tid.unwrap_or(target.pid);
        tracer::single_step(tid)?;
        tracer::wait_for_stop(tid, Some(WaitPidFlag::__WALL))?;
        Ok(())
    }

    pub fn step_over(&self) -> Result<()> {
        Err(DebuggerError::Unsupported("step_over"))
    }

    /// Resumes the target and blocks until a stop that should surface.
    ///
    /// A SIGTRAP whose PC sits on an enabled breakpoint consults the
    /// breakpoint's condition; an unmet condition steps across the
    /// breakpoint transparently and resumes without surfacing the stop.
    pub fn continue_until_stop(&mut self) -> Result<StopEvent> {
        self.target()?;
        self.run()?;

        loop {
            let status = tracer::wait(Pid::from_raw(-1), Some(WaitPidFlag::__WALL))?;
            match status {
                WaitStatus::Exited(tid, code) => {
                    info!("target {tid} exited with code {code}");
                    self.target = None;
                    self.images.clear();
                    return Ok(StopEvent {
                        tid: tid.as_raw(),
                        pc: None,
                        signal: None,
                        breakpoint: None,
                        exit_code: Some(code),
                    });
                }
                WaitStatus::Signaled(tid, sig, _) => {
                    info!("target {tid} terminated by {sig}");
                    self.target = None;
                    self.images.clear();
                    return Ok(StopEvent {
                        tid: tid.as_raw(),
                        pc: None,
                        signal: Some(sig.to_string()),
                        breakpoint: None,
                        exit_code: Some(-1),
                    });
                }
                WaitStatus::Stopped(tid, Signal::SIGTRAP) => {
                    let pc = Addr::from(self.registers.get_pc(tid)?);
                    // BRK does not advance the PC, so a software hit
                    // reports the breakpoint's own address
                    let hit = self
                        .breakpoints
                        .by_tid(tid)
                        .into_iter()
                        .find(|bp| bp.address == pc && bp.enabled);

                    let Some(bp) = hit else {
                        return Ok(StopEvent::at(tid, pc));
                    };

                    if self.breakpoints.check_condition(bp.id) {
                        let mut event = StopEvent::at(tid, pc);
                        event.breakpoint = Some(bp.id);
                        return Ok(event);
                    }

                    debug!("breakpoint {} condition not met, resuming", bp.id);
                    self.step_across_breakpoint(tid, &bp)?;
                    tracer::cont(tid)?;
                }
                WaitStatus::Stopped(tid, sig) => {
                    info!("target {tid} stopped by {sig}");
                    let pc = self.registers.get_pc(tid).ok().map(Addr::from);
                    return Ok(StopEvent {
                        tid: tid.as_raw(),
                        pc,
                        signal: Some(sig.to_string()),
                        breakpoint: None,
                        exit_code: None,
                    });
                }
                WaitStatus::PtraceEvent(tid, _, event) => {
                    debug!("ptrace event {event} on thread {tid}, resuming");
                    tracer::cont(tid)?;
                }
                other => {
                    debug!("unhandled wait status {other:?}");
                }
            }
        }
    }

    /// Steps one thread across a breakpoint it currently sits on: the
    /// patch is lifted, the original instruction executes, the patch
    /// returns.
    fn step_across_breakpoint(&self, tid: Pid, bp: &Breakpoint) -> Result<()> {
        self.breakpoints.disable(bp.id)?;
        tracer::single_step(tid)?;
        tracer::wait_for_stop(tid, Some(WaitPidFlag::__WALL))?;
        self.breakpoints.enable(bp.id)?;
        Ok(())
    }

    /// Injects a parsed ELF image into the target and records the
    /// handle for later unloading.
    pub fn inject_elf(
        &mut self,
        resolver: &crate::elf::ElfResolver,
        preferred_base: Addr,
        external: &SymbolTable,
    ) -> Result<LoadedImage> {
        let pid = self.target()?.pid;
        let image = self.loader.load(pid, resolver, preferred_base, external)?;
        self.images.insert(image.load_base.u64(), image.clone());
        Ok(image)
    }

    /// Resolves a symbol by name across the injected images.
    pub fn resolve_symbol(&self, name: &str) -> Result<Addr> {
        for image in self.images.values() {
            if let Some(addr) = image.symbols.get(name) {
                return Ok(*addr);
            }
        }
        Err(DebuggerError::SymbolNotFound(name.to_string()))
    }

    /// Unloads a previously injected image by its load base.
    pub fn unload_image(&mut self, load_base: Addr) -> Result<()> {
        let pid = self.target()?.pid;
        let image = self
            .images
            .get(&load_base.u64())
            .cloned()
            .ok_or_else(|| {
                DebuggerError::InvalidArgument(format!("no injected image at {load_base}"))
            })?;
        self.loader.unload(pid, &image)?;
        self.images.remove(&load_base.u64());
        Ok(())
    }

    /// Tears the target down: launched targets are killed and reaped,
    /// attached targets are detached.
    pub fn kill_target(&mut self) -> Result<()> {
        let (pid, launched) = match &self.target {
            None => return Ok(()),
            Some(target) => (target.pid, target.launched),
        };
        if !launched {
            self.detach()?;
            return Ok(());
        }

        warn!("killing launched target {pid}");
        signal::kill(pid, Signal::SIGKILL)?;
        loop {
            match tracer::wait(pid, Some(WaitPidFlag::__WALL)) {
                Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) | Err(_) => break,
                Ok(_) => {
                    // a pending stop surfaced first; the kill is still queued
                    let _ = tracer::cont(pid);
                }
            }
        }
        self.target = None;
        self.images.clear();
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::consts::BRK_OPCODE;

    fn launch_sleeper() -> Option<Debugger> {
        let mut debugger = Debugger::build().ok()?;
        let descriptor = LaunchDescriptor::Binary {
            path: PathBuf::from("/bin/sleep"),
            argv: vec!["30".to_string()],
            envp: Vec::new(),
        };
        match debugger.launch(&descriptor) {
            Ok(_) => Some(debugger),
            Err(e) => {
                // sandboxes without ptrace skip the live tests
                eprintln!("skipping live test: {e}");
                None
            }
        }
    }

    #[test]
    fn test_app_descriptor_parsing() {
        let app = LaunchDescriptor::app_from_target("com.example.app/.MainActivity");
        assert_eq!(
            app,
            LaunchDescriptor::App {
                package: "com.example.app".to_string(),
                activity: "/.MainActivity".to_string(),
            }
        );
        let cmd = app.am_command().unwrap();
        assert!(cmd.starts_with("am start -D -n com.example.app/.MainActivity"));
        assert!(cmd.contains("android.intent.action.MAIN"));
        assert!(cmd.contains("android.intent.category.LAUNCHER"));

        let bare = LaunchDescriptor::app_from_target("com.example.app");
        assert_eq!(
            bare,
            LaunchDescriptor::App {
                package: "com.example.app".to_string(),
                activity: String::new(),
            }
        );
    }

    #[test]
    fn test_launch_rejects_missing_binary() {
        let mut debugger = Debugger::build().unwrap();
        let err = debugger
            .launch(&LaunchDescriptor::Binary {
                path: PathBuf::from("/definitely/not/here"),
                argv: Vec::new(),
                envp: Vec::new(),
            })
            .unwrap_err();
        assert!(matches!(err, DebuggerError::ExecutableDoesNotExist(_)));
        assert!(debugger.pid().is_none());
    }

    #[test]
    fn test_step_over_is_unsupported() {
        let debugger = Debugger::build().unwrap();
        assert!(matches!(
            debugger.step_over(),
            Err(DebuggerError::Unsupported("step_over"))
        ));
    }

    #[test]
    fn test_operations_without_target() {
        let mut debugger = Debugger::build().unwrap();
        assert!(matches!(debugger.run(), Err(DebuggerError::NoTarget)));
        assert!(matches!(debugger.detach(), Err(DebuggerError::NoTarget)));
        assert!(matches!(
            debugger.step_into(None),
            Err(DebuggerError::NoTarget)
        ));
        assert!(debugger.kill_target().is_ok());
    }

    #[test]
    fn test_launch_lifecycle() {
        let Some(mut debugger) = launch_sleeper() else {
            return;
        };
        let pid = debugger.pid().unwrap();
        assert_eq!(debugger.tids(), &[pid]);

        // a second launch is refused while the target lives
        let again = debugger.launch(&LaunchDescriptor::Binary {
            path: PathBuf::from("/bin/sleep"),
            argv: vec!["1".to_string()],
            envp: Vec::new(),
        });
        assert!(matches!(again, Err(DebuggerError::AlreadyTracing)));

        let regions = debugger.memory.regions(pid).unwrap();
        assert!(!regions.is_empty());
        for pair in regions.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }

        debugger.kill_target().unwrap();
        assert!(debugger.pid().is_none());
    }

    #[test]
    fn test_software_breakpoint_round_trip() {
        let Some(mut debugger) = launch_sleeper() else {
            return;
        };
        let pid = debugger.pid().unwrap();

        // the first mapped page is 4-byte aligned and readable
        let regions = debugger.memory.regions(pid).unwrap();
        let addr = regions
            .iter()
            .find(|region| region.is_readable())
            .map(|region| region.start)
            .unwrap();

        let mut original = [0u8; 4];
        debugger.memory.read(pid, addr, &mut original).unwrap();

        let id = debugger.breakpoints.set_software(pid, addr, None).unwrap();
        assert!(id >= 1);

        let mut patched = [0u8; 4];
        debugger.memory.read(pid, addr, &mut patched).unwrap();
        assert_eq!(u32::from_le_bytes(patched), BRK_OPCODE);

        // same (tid, addr, type) twice is refused
        assert!(matches!(
            debugger.breakpoints.set_software(pid, addr, None),
            Err(DebuggerError::DuplicateBreakpoint { .. })
        ));

        // disable restores, enable re-patches, both are idempotent
        debugger.breakpoints.disable(id).unwrap();
        debugger.breakpoints.disable(id).unwrap();
        debugger.memory.read(pid, addr, &mut patched).unwrap();
        assert_eq!(patched, original);
        debugger.breakpoints.enable(id).unwrap();
        debugger.breakpoints.enable(id).unwrap();
        debugger.memory.read(pid, addr, &mut patched).unwrap();
        assert_eq!(u32::from_le_bytes(patched), BRK_OPCODE);

        // removal restores the original word bit for bit
        debugger.breakpoints.remove(id).unwrap();
        debugger.memory.read(pid, addr, &mut patched).unwrap();
        assert_eq!(patched, original);
        assert!(debugger.breakpoints.get(id).is_none());
        assert!(debugger.breakpoints.by_tid(pid).is_empty());

        debugger.kill_target().unwrap();
    }

    #[test]
    fn test_breakpoint_ids_are_monotonic() {
        let Some(mut debugger) = launch_sleeper() else {
            return;
        };
        let pid = debugger.pid().unwrap();
        let base = debugger.memory.regions(pid).unwrap()[0].start;

        let first = debugger.breakpoints.set_software(pid, base, None).unwrap();
        let second = debugger
            .breakpoints
            .set_software(pid, base + 4u64, None)
            .unwrap();
        assert!(second > first);
        assert_eq!(debugger.breakpoints.installed_count(), 2);
        assert_eq!(debugger.breakpoints.by_tid(pid).len(), 2);

        debugger.breakpoints.remove(first).unwrap();
        debugger.breakpoints.remove(second).unwrap();
        assert_eq!(debugger.breakpoints.installed_count(), 0);

        debugger.kill_target().unwrap();
    }

    #[test]
    fn test_resolve_symbol_without_images() {
        let debugger = Debugger::build().unwrap();
        assert!(matches!(
            debugger.resolve_symbol("anything"),
            Err(DebuggerError::SymbolNotFound(_))
        ));
    }

    #[test]
    #[cfg(target_arch = "aarch64")]
    fn test_hw_slot_conservation() {
        use crate::breakpoint::HwBreakpointKind;

        let Some(mut debugger) = launch_sleeper() else {
            return;
        };
        let pid = debugger.pid().unwrap();

        let Ok(count) = debugger.breakpoints.probe_hw_slots(pid) else {
            debugger.kill_target().unwrap();
            return;
        };
        assert_eq!(debugger.breakpoints.free_slot_count(), count);

        if count > 0 {
            let addr = debugger.memory.regions(pid).unwrap()[0].start;
            let id = debugger
                .breakpoints
                .set_hardware(pid, addr, HwBreakpointKind::Execution, None)
                .unwrap();
            assert_eq!(debugger.breakpoints.free_slot_count(), count - 1);
            debugger.breakpoints.remove(id).unwrap();
            assert_eq!(debugger.breakpoints.free_slot_count(), count);
        }

        debugger.kill_target().unwrap();
    }

    #[test]
    fn test_detach_releases_target() {
        let Some(mut debugger) = launch_sleeper() else {
            return;
        };
        let pid = debugger.pid().unwrap();
        debugger.detach().unwrap();
        assert!(debugger.pid().is_none());

        // the sleeper is no longer traced; clean it up
        let _ = signal::kill(pid, Signal::SIGKILL);
    }
}
