use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks a mutex, recovering the data if a previous holder panicked.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Requester id carried in a channel name: the leading decimal digits of the
/// final path component, e.g. `/tmp/17_request` yields 17.
pub fn client_id_from_channel(name: &str) -> i32 {
    let file = name.rsplit('/').next().unwrap_or(name);
    let digits: String = file.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_from_channel() {
        assert_eq!(client_id_from_channel("/tmp/17_request"), 17);
        assert_eq!(client_id_from_channel("/tmp/3"), 3);
        assert_eq!(client_id_from_channel("42_notif"), 42);
        assert_eq!(client_id_from_channel("/tmp/alice_request"), 0);
        assert_eq!(client_id_from_channel("/var/run/99999999999_x"), 0);
    }

    #[test]
    fn test_lock_recovers_from_poison() {
        let mutex = std::sync::Arc::new(Mutex::new(5));
        let poisoner = std::sync::Arc::clone(&mutex);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison the lock");
        })
        .join();

        assert!(mutex.is_poisoned());
        assert_eq!(*lock(&mutex), 5);
    }
}
