//! Threat detection and response
//!
//! A small probe framework that surveys the runtime environment and, when
//! enough probes fire, runs the vault's emergency wipe. Probes are trait
//! objects so platform-specific checks (debugger attachment, tampered
//! binaries, hostile environment variables) plug in without touching the
//! response logic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::vault::Vault;

/// A single environment check
pub trait ThreatProbe: Send + Sync {
    /// Stable name reported in scan results
    fn name(&self) -> &str;
    /// Whether the condition this probe watches for is present
    fn triggered(&self) -> bool;
}

/// How bad a scan's findings are
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Nothing found
    Clear,
    /// Findings below the response threshold
    Advisory,
    /// At or above the threshold; destructive response warranted
    Severe,
}

/// Outcome of one scan pass
#[derive(Debug)]
pub struct ScanReport {
    /// Names of the probes that fired
    pub violations: Vec<String>,
    /// Overall severity
    pub severity: Severity,
}

/// Probe registry plus the response threshold
pub struct ThreatResponder {
    probes: Vec<Box<dyn ThreatProbe>>,
    /// Number of fired probes that makes a scan severe
    severe_threshold: usize,
}

impl ThreatResponder {
    /// Create a responder with the given probes; `severe_threshold` fired
    /// probes escalate a scan to `Severe`
    pub fn new(probes: Vec<Box<dyn ThreatProbe>>, severe_threshold: usize) -> Self {
        Self {
            probes,
            severe_threshold: severe_threshold.max(1),
        }
    }

    /// Run every probe once
    pub fn scan(&self) -> ScanReport {
        let violations: Vec<String> = self
            .probes
            .iter()
            .filter(|p| p.triggered())
            .map(|p| p.name().to_string())
            .collect();

        let severity = if violations.is_empty() {
            Severity::Clear
        } else if violations.len() >= self.severe_threshold {
            Severity::Severe
        } else {
            Severity::Advisory
        };

        ScanReport {
            violations,
            severity,
        }
    }

    /// Scan and run the emergency wipe on a severe result
    pub fn scan_and_respond(&self, vault: &Vault) -> ScanReport {
        let report = self.scan();
        if report.severity == Severity::Severe {
            vault.emergency_wipe();
        }
        report
    }
}

/// Handle to a running periodic scan thread
pub struct PeriodicScan {
    stop: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl PeriodicScan {
    /// Start a background thread scanning at the given interval
    pub fn start(responder: Arc<ThreatResponder>, vault: Arc<Vault>, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = std::thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                let report = responder.scan_and_respond(&vault);
                if report.severity == Severity::Severe {
                    break;
                }
                std::thread::sleep(interval);
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Signal the thread to exit after its current sleep and wait for it
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PeriodicScan {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthStatus, PinHashParams};
    use crate::config::StrongboxPaths;
    use crate::crypto::keystore::MemoryKeystore;
    use tempfile::TempDir;

    struct FixedProbe {
        name: &'static str,
        fired: bool,
    }

    impl ThreatProbe for FixedProbe {
        fn name(&self) -> &str {
            self.name
        }
        fn triggered(&self) -> bool {
            self.fired
        }
    }

    fn probe(name: &'static str, fired: bool) -> Box<dyn ThreatProbe> {
        Box::new(FixedProbe { name, fired })
    }

    fn test_vault(tmp: &TempDir) -> Vault {
        Vault::with_provider(
            StrongboxPaths::with_base_dir(tmp.path().to_path_buf()),
            Arc::new(MemoryKeystore::new()),
        )
        .unwrap()
        .with_pin_params(PinHashParams::with_values(64, 1, 1))
    }

    #[test]
    fn test_clean_scan() {
        let responder = ThreatResponder::new(vec![probe("debugger", false)], 1);
        let report = responder.scan();
        assert!(report.violations.is_empty());
        assert_eq!(report.severity, Severity::Clear);
    }

    #[test]
    fn test_advisory_below_threshold() {
        let responder =
            ThreatResponder::new(vec![probe("debugger", true), probe("env", false)], 2);
        let report = responder.scan();
        assert_eq!(report.violations, vec!["debugger".to_string()]);
        assert_eq!(report.severity, Severity::Advisory);
    }

    #[test]
    fn test_severe_at_threshold() {
        let responder = ThreatResponder::new(vec![probe("debugger", true), probe("env", true)], 2);
        assert_eq!(responder.scan().severity, Severity::Severe);
    }

    #[test]
    fn test_severe_scan_wipes_vault() {
        let tmp = TempDir::new().unwrap();
        let vault = test_vault(&tmp);
        vault.auth().setup_pin("5678").unwrap();
        vault.master().record_biometric_success();
        assert!(vault.auth().verify_second_factor("5678").unwrap());

        let responder = ThreatResponder::new(vec![probe("tamper", true)], 1);
        let report = responder.scan_and_respond(&vault);

        assert_eq!(report.severity, Severity::Severe);
        assert_eq!(vault.auth().status().unwrap(), AuthStatus::SetupRequired);
        assert!(!vault.master().is_unlocked());
    }

    #[test]
    fn test_advisory_scan_leaves_vault_intact() {
        let tmp = TempDir::new().unwrap();
        let vault = test_vault(&tmp);
        vault.auth().setup_pin("5678").unwrap();
        vault.master().record_biometric_success();
        assert!(vault.auth().verify_second_factor("5678").unwrap());

        let responder = ThreatResponder::new(vec![probe("env", true), probe("dbg", false)], 2);
        let report = responder.scan_and_respond(&vault);

        assert_eq!(report.severity, Severity::Advisory);
        assert_eq!(vault.auth().status().unwrap(), AuthStatus::Authenticated);
    }

    #[test]
    fn test_periodic_scan_stops_after_severe() {
        let tmp = TempDir::new().unwrap();
        let vault = Arc::new(test_vault(&tmp));
        let responder = Arc::new(ThreatResponder::new(vec![probe("tamper", true)], 1));

        let scan = PeriodicScan::start(responder, vault.clone(), Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(50));
        scan.stop();

        assert_eq!(vault.auth().status().unwrap(), AuthStatus::SetupRequired);
    }
}
