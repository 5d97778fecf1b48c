//! Real-time scheduling helpers (Linux SCHED_FIFO / affinity / mlockall; macOS mlockall).

use crate::cli::RtLock;

#[cfg(target_os = "linux")]
/// Capacity of cpu_set_t in CPU indices (bits).
const MAX_CPUSET_BITS: usize = std::mem::size_of::<libc::cpu_set_t>() * 8;

#[cfg(target_os = "linux")]
pub fn setup_rt_once(rt: bool, prio: Option<i32>, lock: RtLock, rt_cpu: Option<usize>) {
    use libc::{CPU_ISSET, CPU_SET, CPU_ZERO, MCL_CURRENT, MCL_FUTURE, SCHED_FIFO};
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();

    if !rt {
        return;
    }

    fn mlock_flags(flags: libc::c_int) -> std::io::Result<()> {
        let rc = unsafe { libc::mlockall(flags) };
        if rc != 0 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    fn memlock_limit_hint() -> Option<String> {
        let mut rlim = std::mem::MaybeUninit::<libc::rlimit>::uninit();
        let rc = unsafe { libc::getrlimit(libc::RLIMIT_MEMLOCK, rlim.as_mut_ptr()) };
        if rc != 0 {
            return None;
        }
        let cur = unsafe { rlim.assume_init() }.rlim_cur;
        Some(if cur == libc::RLIM_INFINITY {
            "memlock limit: unlimited".to_string()
        } else {
            format!("memlock limit: {} KiB", cur / 1024)
        })
    }

    // Lock memory per the selected mode; a denied All retries as Current.
    fn try_apply_mem_lock(lock: RtLock) -> eyre::Result<()> {
        let result = match lock {
            RtLock::None => return Ok(()),
            RtLock::Current => mlock_flags(MCL_CURRENT),
            RtLock::All => mlock_flags(MCL_CURRENT | MCL_FUTURE),
        };
        let Err(err) = result else { return Ok(()) };
        let retryable =
            matches!(err.raw_os_error(), Some(code) if code == libc::EPERM || code == libc::ENOMEM);
        if lock == RtLock::All && retryable && mlock_flags(MCL_CURRENT).is_ok() {
            eprintln!("RT: mlockall(current|future) denied, fell back to current");
            return Ok(());
        }
        let mut msg = format!("mlockall failed: {err}");
        if retryable {
            if let Some(h) = memlock_limit_hint() {
                msg.push_str(&format!("; {h}"));
            }
            msg.push_str("; hint: needs CAP_IPC_LOCK (or root) and sufficient 'ulimit -l'");
        }
        Err(eyre::eyre!(msg))
    }

    // SCHED_FIFO at the requested priority, clamped to the system range.
    fn try_apply_fifo_priority(prio: Option<i32>) -> eyre::Result<()> {
        let (min, max) = unsafe {
            let min = libc::sched_get_priority_min(SCHED_FIFO);
            let max = libc::sched_get_priority_max(SCHED_FIFO);
            if min < 0 || max < 0 { (1, 99) } else { (min, max) }
        };
        let param = libc::sched_param {
            sched_priority: prio.unwrap_or(max).clamp(min, max),
        };
        let rc = unsafe { libc::sched_setscheduler(0, SCHED_FIFO, &param) };
        if rc != 0 {
            Err(eyre::eyre!(
                "{}; hint: needs CAP_SYS_NICE or root ('sudo setcap cap_sys_nice=ep /path/to/hopper')",
                std::io::Error::last_os_error()
            ))
        } else {
            Ok(())
        }
    }

    // Pin to one CPU if the current affinity mask allows it.
    fn try_apply_affinity(rt_cpu: Option<usize>) -> eyre::Result<()> {
        let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if online < 1 {
            eyre::bail!("_SC_NPROCESSORS_ONLN < 1");
        }
        let target = rt_cpu.unwrap_or(0);
        if target as libc::c_long >= online {
            eyre::bail!("requested CPU {target} >= online {online}");
        }
        if target >= MAX_CPUSET_BITS {
            eyre::bail!("requested CPU {target} exceeds cpu_set_t capacity {MAX_CPUSET_BITS}");
        }
        let mut allowed: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut allowed)
        };
        if rc == 0 && !unsafe { CPU_ISSET(target, &allowed) } {
            eyre::bail!("CPU {target} not permitted by current affinity mask");
        }
        let mut desired: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        unsafe {
            CPU_ZERO(&mut desired);
            CPU_SET(target, &mut desired);
        }
        let rc =
            unsafe { libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &desired) };
        if rc != 0 {
            Err(eyre::eyre!(std::io::Error::last_os_error()))
        } else {
            Ok(())
        }
    }

    RT_ONCE.get_or_init(|| {
        // Memory lock
        match try_apply_mem_lock(lock) {
            Ok(()) => match lock {
                RtLock::None => eprintln!("RT: memory locking disabled (none)"),
                RtLock::Current => eprintln!("RT: memory lock = current"),
                RtLock::All => eprintln!("RT: memory lock = all (current|future)"),
            },
            Err(err) => eprintln!("Warning: mlockall failed: {err}"),
        }
        // FIFO priority
        if let Err(err) = try_apply_fifo_priority(prio) {
            let prio_dbg = prio
                .map(|p| p.to_string())
                .unwrap_or_else(|| "(max)".into());
            eprintln!("Warning: sched_setscheduler(SCHED_FIFO, prio={prio_dbg}) failed: {err}");
        }
        // Affinity
        if let Err(err) = try_apply_affinity(rt_cpu) {
            eprintln!("Warning: affinity not applied: {err}");
        }
    });
}

#[cfg(target_os = "macos")]
pub fn setup_rt_once(rt: bool, lock: RtLock) {
    use libc::{MCL_CURRENT, MCL_FUTURE, mlockall};
    use std::sync::OnceLock;
    static RT_ONCE: OnceLock<()> = OnceLock::new();
    if !rt {
        return;
    }
    RT_ONCE.get_or_init(|| {
        let flags = match lock {
            RtLock::None => {
                eprintln!("RT: memory locking disabled (none)");
                return;
            }
            RtLock::Current => MCL_CURRENT,
            RtLock::All => MCL_CURRENT | MCL_FUTURE,
        };
        let rc = unsafe { mlockall(flags) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            eprintln!("Warning: mlockall failed: {err}");
        } else {
            eprintln!("RT: memory lock = {lock:?}");
        }
        eprintln!("Warning: macOS does not support SCHED_FIFO or affinity; only mlockall applied.");
    });
}
