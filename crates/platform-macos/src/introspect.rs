//! Process introspection for macOS.
//!
//! Implements [`sensor_core::ProcessIntrospect`] over libproc FFI:
//! proc_pidpath for the executable, proc_pidinfo(PROC_PIDTBSDINFO) for
//! ppid/uid, proc_pidinfo(PROC_PIDVNODEPATHINFO) for the working
//! directory, sysctl(KERN_PROCARGS2) for argv, and proc_listallpids for
//! the live-pid snapshot.

use sensor_core::ProcessIntrospect;

#[cfg(target_os = "macos")]
const PROC_PIDPATHINFO_MAXSIZE: usize = 4096;

#[cfg(target_os = "macos")]
extern "C" {
    fn proc_pidpath(pid: libc::c_int, buffer: *mut libc::c_char, bufsize: u32) -> libc::c_int;
    fn proc_pidinfo(
        pid: libc::c_int,
        flavor: libc::c_int,
        arg: u64,
        buffer: *mut libc::c_void,
        buffersize: libc::c_int,
    ) -> libc::c_int;
    fn proc_listallpids(buffer: *mut libc::c_void, buffersize: libc::c_int) -> libc::c_int;
}

/// PROC_PIDTBSDINFO flavor constant for proc_pidinfo.
#[cfg(target_os = "macos")]
const PROC_PIDTBSDINFO: libc::c_int = 3;

/// PROC_PIDVNODEPATHINFO flavor constant for proc_pidinfo.
#[cfg(target_os = "macos")]
const PROC_PIDVNODEPATHINFO: libc::c_int = 9;

/// BSD info structure returned by proc_pidinfo(PROC_PIDTBSDINFO).
///
/// Must match `struct proc_bsdinfo` from `<sys/proc_info.h>` (size = 136 bytes).
#[cfg(target_os = "macos")]
#[repr(C)]
struct ProcBsdInfo {
    pbi_flags: u32,
    pbi_status: u32,
    pbi_xstatus: u32,
    pbi_pid: u32,
    pbi_ppid: u32,
    pbi_uid: u32,
    pbi_gid: u32,
    pbi_ruid: u32,
    pbi_rgid: u32,
    pbi_svuid: u32,
    pbi_svgid: u32,
    _reserved: u32,
    pbi_comm: [u8; 16],
    pbi_name: [u8; 32],
    pbi_nfiles: u32,
    pbi_pgid: u32,
    pbi_pjobc: u32,
    e_tdev: u32,
    e_tpgid: u32,
    pbi_nice: i32,
    pbi_start_tvsec: u64,
    pbi_start_tvusec: u64,
}

#[cfg(target_os = "macos")]
const _: () = assert!(
    std::mem::size_of::<ProcBsdInfo>() == 136,
    "ProcBsdInfo size must match proc_bsdinfo (136 bytes)"
);

/// Layout-compatible stand-in for `struct vnode_info_path` from
/// `<sys/proc_info.h>`: an opaque `struct vnode_info` (152 bytes)
/// followed by a MAXPATHLEN path buffer. Only the path is read.
#[cfg(target_os = "macos")]
#[repr(C)]
struct VnodeInfoPath {
    _vip_vi: [u8; 152],
    vip_path: [u8; 1024],
}

/// Must match `struct proc_vnodepathinfo` (cdir then rdir).
#[cfg(target_os = "macos")]
#[repr(C)]
struct ProcVnodePathInfo {
    pvi_cdir: VnodeInfoPath,
    pvi_rdir: VnodeInfoPath,
}

#[cfg(target_os = "macos")]
const _: () = assert!(
    std::mem::size_of::<ProcVnodePathInfo>() == 2352,
    "ProcVnodePathInfo size must match proc_vnodepathinfo (2352 bytes)"
);

/// libproc-backed introspection. Stateless; every method is a fresh
/// kernel query.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformIntrospect;

impl PlatformIntrospect {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessIntrospect for PlatformIntrospect {
    fn list_pids(&self) -> Vec<u32> {
        #[cfg(target_os = "macos")]
        {
            list_pids_macos()
        }
        #[cfg(not(target_os = "macos"))]
        {
            Vec::new()
        }
    }

    fn exec_path(&self, pid: u32) -> Option<String> {
        #[cfg(target_os = "macos")]
        {
            query_exec_path(pid)
        }
        #[cfg(not(target_os = "macos"))]
        {
            let _ = pid;
            None
        }
    }

    fn working_dir(&self, pid: u32) -> Option<String> {
        #[cfg(target_os = "macos")]
        {
            query_working_dir(pid)
        }
        #[cfg(not(target_os = "macos"))]
        {
            let _ = pid;
            None
        }
    }

    fn args(&self, pid: u32) -> Option<Vec<String>> {
        #[cfg(target_os = "macos")]
        {
            query_args(pid)
        }
        #[cfg(not(target_os = "macos"))]
        {
            let _ = pid;
            None
        }
    }

    fn ppid(&self, pid: u32) -> Option<u32> {
        #[cfg(target_os = "macos")]
        {
            query_bsd_info(pid).map(|info| info.pbi_ppid)
        }
        #[cfg(not(target_os = "macos"))]
        {
            let _ = pid;
            None
        }
    }

    fn uid(&self, pid: u32) -> Option<u32> {
        #[cfg(target_os = "macos")]
        {
            query_bsd_info(pid).map(|info| info.pbi_uid)
        }
        #[cfg(not(target_os = "macos"))]
        {
            let _ = pid;
            None
        }
    }
}

// -- macOS implementations --------------------------------------------------

#[cfg(target_os = "macos")]
fn list_pids_macos() -> Vec<u32> {
    // First call with a null buffer returns the byte size needed.
    let bytes = unsafe { proc_listallpids(std::ptr::null_mut(), 0) };
    if bytes <= 0 {
        return Vec::new();
    }

    // Leave headroom for processes spawned between the two calls.
    let capacity = bytes as usize / std::mem::size_of::<libc::c_int>() + 32;
    let mut pids = vec![0 as libc::c_int; capacity];
    let ret = unsafe {
        proc_listallpids(
            pids.as_mut_ptr() as *mut libc::c_void,
            (pids.len() * std::mem::size_of::<libc::c_int>()) as libc::c_int,
        )
    };
    if ret <= 0 {
        return Vec::new();
    }

    pids.truncate(ret as usize);
    pids.into_iter()
        .filter(|pid| *pid > 0)
        .map(|pid| pid as u32)
        .collect()
}

#[cfg(target_os = "macos")]
fn query_exec_path(pid: u32) -> Option<String> {
    let mut buf = vec![0u8; PROC_PIDPATHINFO_MAXSIZE];
    let ret = unsafe {
        proc_pidpath(
            pid as libc::c_int,
            buf.as_mut_ptr() as *mut libc::c_char,
            buf.len() as u32,
        )
    };
    if ret <= 0 {
        return None;
    }
    let path = String::from_utf8_lossy(&buf[..ret as usize])
        .trim_end_matches('\0')
        .to_string();
    if path.is_empty() {
        None
    } else {
        Some(path)
    }
}

#[cfg(target_os = "macos")]
fn query_working_dir(pid: u32) -> Option<String> {
    let mut info = std::mem::MaybeUninit::<ProcVnodePathInfo>::zeroed();
    let ret = unsafe {
        proc_pidinfo(
            pid as libc::c_int,
            PROC_PIDVNODEPATHINFO,
            0,
            info.as_mut_ptr() as *mut libc::c_void,
            std::mem::size_of::<ProcVnodePathInfo>() as libc::c_int,
        )
    };
    if ret <= 0 {
        return None;
    }
    let info = unsafe { info.assume_init() };

    let raw = &info.pvi_cdir.vip_path;
    let len = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    if len == 0 {
        return None;
    }
    Some(String::from_utf8_lossy(&raw[..len]).to_string())
}

#[cfg(target_os = "macos")]
fn query_bsd_info(pid: u32) -> Option<ProcBsdInfo> {
    let mut info = std::mem::MaybeUninit::<ProcBsdInfo>::zeroed();
    let ret = unsafe {
        proc_pidinfo(
            pid as libc::c_int,
            PROC_PIDTBSDINFO,
            0,
            info.as_mut_ptr() as *mut libc::c_void,
            std::mem::size_of::<ProcBsdInfo>() as libc::c_int,
        )
    };
    if ret <= 0 {
        return None;
    }
    Some(unsafe { info.assume_init() })
}

#[cfg(target_os = "macos")]
fn query_args(pid: u32) -> Option<Vec<String>> {
    // sysctl(CTL_KERN, KERN_PROCARGS2) returns the saved argv block.
    let mut mib: [libc::c_int; 3] = [libc::CTL_KERN, libc::KERN_PROCARGS2, pid as libc::c_int];
    let mut size: libc::size_t = 0;

    // First call to get the buffer size.
    let ret = unsafe {
        libc::sysctl(
            mib.as_mut_ptr(),
            3,
            std::ptr::null_mut(),
            &mut size,
            std::ptr::null_mut(),
            0,
        )
    };
    if ret != 0 || size == 0 {
        return None;
    }

    let mut buf = vec![0u8; size];
    let ret = unsafe {
        libc::sysctl(
            mib.as_mut_ptr(),
            3,
            buf.as_mut_ptr() as *mut libc::c_void,
            &mut size,
            std::ptr::null_mut(),
            0,
        )
    };
    if ret != 0 {
        return None;
    }

    parse_procargs2(&buf[..size])
}

/// Buffer layout: [argc(4 bytes)][exec_path\0][padding\0...][arg0\0][arg1\0]...
#[cfg(any(target_os = "macos", test))]
fn parse_procargs2(buf: &[u8]) -> Option<Vec<String>> {
    if buf.len() < 4 {
        return None;
    }
    let argc = (u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize).min(4096);

    // Skip the exec path and its null padding.
    let mut pos = 4;
    while pos < buf.len() && buf[pos] != 0 {
        pos += 1;
    }
    while pos < buf.len() && buf[pos] == 0 {
        pos += 1;
    }

    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        if pos >= buf.len() {
            break;
        }
        let start = pos;
        while pos < buf.len() && buf[pos] != 0 {
            pos += 1;
        }
        args.push(String::from_utf8_lossy(&buf[start..pos]).to_string());
        pos += 1; // skip null
    }

    if args.is_empty() {
        None
    } else {
        Some(args)
    }
}
