use std::sync::atomic::{AtomicBool, Ordering};

use super::StreamError;

/// Process-wide admission for the single streaming session.
///
/// Idle when constructed; a fresh process therefore always starts with no session active.
#[derive(Debug, Default)]
pub struct StreamGate {
    active: AtomicBool,
}

impl StreamGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the admission token, or `Busy` if a session already holds it.
    pub fn try_admit(&self) -> Result<AdmissionToken<'_>, StreamError> {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| StreamError::Busy)?;
        Ok(AdmissionToken { gate: self })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

/// Proof of admission. Dropping it (on any exit path) reopens the gate.
#[derive(Debug)]
pub struct AdmissionToken<'a> {
    gate: &'a StreamGate,
}

impl Drop for AdmissionToken<'_> {
    fn drop(&mut self) {
        self.gate.active.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn second_admission_is_busy() {
        let gate = StreamGate::new();
        let token = gate.try_admit().unwrap();
        assert!(gate.is_active());
        assert_eq!(gate.try_admit().unwrap_err(), StreamError::Busy);
        drop(token);
        assert!(!gate.is_active());
        assert!(gate.try_admit().is_ok());
    }

    #[test]
    fn rejections_never_leave_the_gate_stuck() {
        let gate = StreamGate::new();
        let token = gate.try_admit().unwrap();
        for _ in 0..1_000 {
            assert!(gate.try_admit().is_err());
        }
        drop(token);
        assert!(!gate.is_active());
    }

    #[test]
    fn token_released_on_panic() {
        let gate = Arc::new(StreamGate::new());
        let worker_gate = gate.clone();
        let result = std::thread::spawn(move || {
            let _token = worker_gate.try_admit().unwrap();
            panic!("session crashed");
        })
        .join();
        assert!(result.is_err());
        assert!(!gate.is_active());
    }

    #[test]
    fn concurrent_admissions_yield_one_winner() {
        let gate = Arc::new(StreamGate::new());
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let (tx, rx) = std::sync::mpsc::channel();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                let barrier = barrier.clone();
                let tx = tx.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    let admitted = gate.try_admit().map(std::mem::forget).is_ok();
                    tx.send(admitted).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        drop(tx);
        let winners = rx.iter().filter(|admitted| *admitted).count();
        assert_eq!(winners, 1);
        assert!(gate.is_active());
    }
}
