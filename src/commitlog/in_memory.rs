use crate::commitlog::{LogStorage, Offset};
use bytes::Bytes;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

// Durability is modelled, not provided. Good enough for tests and the demo cluster; a disk backed
// log plugs in through `LogStorage`.
pub struct InMemoryLog {
    inner: Mutex<Inner>,
    fail_writes: AtomicBool,
}

struct Inner {
    // Records at offsets [base, base + records.len()).
    records: VecDeque<Bytes>,
    base: u64,
    is_open: bool,
}

impl InMemoryLog {
    pub fn create() -> Self {
        InMemoryLog {
            inner: Mutex::new(Inner {
                records: VecDeque::new(),
                base: 0,
                is_open: false,
            }),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Makes every following `put()` and `mark()` fail, to exercise storage fault handling.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    /// Number of records retained, i.e. not discarded by `mark()`.
    pub fn retained_len(&self) -> usize {
        self.lock().records.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock can't leave `Inner` half updated, so recover the guard.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_writable(&self, inner: &Inner) -> Result<(), io::Error> {
        if !inner.is_open {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "log is not open"));
        }
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }

        Ok(())
    }
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::create()
    }
}

impl LogStorage for InMemoryLog {
    fn open(&self) -> Result<(), io::Error> {
        self.lock().is_open = true;
        Ok(())
    }

    fn close(&self) -> Result<(), io::Error> {
        self.lock().is_open = false;
        Ok(())
    }

    fn put(&self, record: Bytes, _force: bool) -> Result<Offset, io::Error> {
        let mut inner = self.lock();
        self.check_writable(&inner)?;

        let offset = inner.base + inner.records.len() as u64;
        inner.records.push_back(record);

        Ok(Offset::new(offset))
    }

    fn get(&self, offset: Offset) -> Result<Option<Bytes>, io::Error> {
        let inner = self.lock();
        let opt_record = offset
            .as_u64()
            .checked_sub(inner.base)
            .and_then(|i| inner.records.get(i as usize))
            .cloned();

        Ok(opt_record)
    }

    fn replay(&self, from: Offset, consumer: &mut dyn FnMut(Offset, Bytes)) -> Result<(), io::Error> {
        // Copy out first so the consumer runs without our lock, and may append.
        let (first, records) = {
            let inner = self.lock();
            let first = std::cmp::max(from.as_u64(), inner.base);
            let skip = (first - inner.base) as usize;
            let records: Vec<Bytes> = inner.records.iter().skip(skip).cloned().collect();
            (first, records)
        };

        for (i, record) in records.into_iter().enumerate() {
            consumer(Offset::new(first + i as u64), record);
        }

        Ok(())
    }

    fn mark(&self, offset: Offset, _force: bool) -> Result<(), io::Error> {
        let mut inner = self.lock();
        self.check_writable(&inner)?;

        while inner.base < offset.as_u64() && !inner.records.is_empty() {
            inner.records.pop_front();
            inner.base += 1;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replayed(log: &InMemoryLog, from: u64) -> Vec<(u64, Bytes)> {
        let mut seen = vec![];
        log.replay(Offset::new(from), &mut |offset, record| seen.push((offset.as_u64(), record)))
            .unwrap();
        seen
    }

    #[test]
    fn put_get_replay() {
        let log = InMemoryLog::create();
        log.open().unwrap();

        for i in 0..5u8 {
            let offset = log.put(Bytes::from(vec![i]), true).unwrap();
            assert_eq!(offset, Offset::new(i as u64));
        }

        assert_eq!(log.get(Offset::new(3)).unwrap(), Some(Bytes::from(vec![3u8])));
        assert_eq!(log.get(Offset::new(5)).unwrap(), None);
        assert_eq!(replayed(&log, 3).len(), 2);
        assert_eq!(replayed(&log, 0)[4], (4, Bytes::from(vec![4u8])));
    }

    #[test]
    fn mark_discards_earlier_records() {
        let log = InMemoryLog::create();
        log.open().unwrap();
        for i in 0..5u8 {
            log.put(Bytes::from(vec![i]), false).unwrap();
        }

        log.mark(Offset::new(3), true).unwrap();

        assert_eq!(log.retained_len(), 2);
        assert_eq!(log.get(Offset::new(2)).unwrap(), None);
        assert_eq!(log.get(Offset::new(3)).unwrap(), Some(Bytes::from(vec![3u8])));
        let offsets: Vec<u64> = replayed(&log, 0).into_iter().map(|(o, _)| o).collect();
        assert_eq!(offsets, vec![3, 4]);

        // Offsets keep counting from where they were.
        assert_eq!(log.put(Bytes::new(), false).unwrap(), Offset::new(5));
    }

    #[test]
    fn writes_fail_when_closed_or_injected() {
        let log = InMemoryLog::create();
        assert!(log.put(Bytes::new(), true).is_err());

        log.open().unwrap();
        log.put(Bytes::new(), true).unwrap();

        log.fail_writes(true);
        assert!(log.put(Bytes::new(), true).is_err());
        assert!(log.mark(Offset::start(), true).is_err());

        log.fail_writes(false);
        assert_eq!(log.put(Bytes::new(), true).unwrap(), Offset::new(1));
    }
}
