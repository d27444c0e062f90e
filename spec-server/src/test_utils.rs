use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Mutex, MutexGuard, OnceLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use utoipa::openapi::OpenApi;

use crate::{
    cache::Clock,
    scanner::{AnnotationScanner, ScanError, ScanTarget, Scanner},
};

pub(crate) const USER_CONTROLLER: &str = r##"<?php

namespace App\Http\Controllers;

class UserController extends Controller
{
    /**
     * List users.
     *
     * @SWG\Get(
     *     path="/user",
     *     tags={"User"},
     *     summary="List all users",
     *     @SWG\Response(
     *         response=200,
     *         description="User collection response",
     *         @SWG\Schema(ref="#/definitions/User")
     *     )
     * )
     *
     * @return \Illuminate\Http\JsonResponse
     */
    public function index()
    {
        return response()->json(User::all());
    }
}
"##;

pub(crate) fn write_file(dir: &Path, rel: &str, contents: &str) -> PathBuf {
    let path = dir.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, contents).unwrap();
    path
}

pub(crate) struct ManualClock {
    now: Mutex<SystemTime>,
}

impl ManualClock {
    pub(crate) fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|err| err.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(UNIX_EPOCH + Duration::from_secs(1_700_000_000)),
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap_or_else(|err| err.into_inner())
    }
}

/// Annotation scanner that records how many times it ran.
#[derive(Default)]
pub(crate) struct CountingScanner {
    calls: AtomicUsize,
}

impl CountingScanner {
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Scanner for CountingScanner {
    fn scan(&self, target: &ScanTarget) -> Result<OpenApi, ScanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        AnnotationScanner.scan(target)
    }
}

pub(crate) struct EnvGuard {
    _lock: MutexGuard<'static, ()>,
    keys: Vec<&'static str>,
}

impl EnvGuard {
    pub(crate) fn set(&mut self, key: &'static str, value: &str) {
        unsafe {
            std::env::set_var(key, value);
        }
        self.keys.push(key);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for key in &self.keys {
            unsafe {
                std::env::remove_var(key);
            }
        }
    }
}

/// Serializes tests that touch process environment variables.
pub(crate) fn env_guard() -> EnvGuard {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let lock = LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|err| err.into_inner());
    EnvGuard {
        _lock: lock,
        keys: Vec::new(),
    }
}
