use std::sync::{Condvar, Mutex, PoisonError};

/// Counting semaphore on a mutex and condvar.
///
/// `post` never blocks for longer than the handoff of the counter; `wait`
/// parks the calling thread until a permit is available.
#[derive(Debug, Default)]
pub struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    pub fn new(permits: usize) -> Self {
        Self {
            permits: Mutex::new(permits),
            available: Condvar::new(),
        }
    }

    pub fn post(&self) {
        self.post_n(1);
    }

    pub fn post_n(&self, n: usize) {
        if n == 0 {
            return;
        }
        let mut permits = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
        *permits += n;
        if n == 1 {
            self.available.notify_one();
        } else {
            self.available.notify_all();
        }
    }

    pub fn wait(&self) {
        let mut permits = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
        while *permits == 0 {
            permits = self
                .available
                .wait(permits)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *permits -= 1;
    }

    pub fn try_wait(&self) -> bool {
        let mut permits = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    pub fn permits(&self) -> usize {
        *self.permits.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::Semaphore;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn posts_are_counted() {
        let sem = Semaphore::new(0);
        assert!(!sem.try_wait());
        sem.post_n(3);
        assert_eq!(sem.permits(), 3);
        sem.wait();
        assert!(sem.try_wait());
        assert_eq!(sem.permits(), 1);
    }

    #[test]
    fn waiter_wakes_on_post() {
        let sem = Arc::new(Semaphore::new(0));
        let waiter = {
            let sem = sem.clone();
            thread::spawn(move || sem.wait())
        };
        sem.post();
        waiter.join().unwrap();
        assert_eq!(sem.permits(), 0);
    }
}
