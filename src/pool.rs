use crate::worker::WorkerId;


/// Элемент пула: воркер с известной текущей нагрузкой.
pub trait Load {
    fn worker_id(&self) -> WorkerId;
    fn pending(&self) -> usize;
}


/// Пул воркеров: бинарная min-куча по числу незавершенных запросов.
///
/// Пул помнит позицию каждого воркера в куче, поэтому воркер можно
/// изменить по идентификатору и восстановить порядок за O(log n),
/// не вынимая его из кучи.
///
/// Между `extract_min` и `insert` воркер физически отсутствует в пуле.
/// Наблюдать пул в этом окне некому: им владеет только цикл диспетчера.
#[derive(Debug)]
pub struct WorkerPool<W: Load> {
    heap: Vec<W>,
    // индекс = WorkerId, значение = позиция в heap
    position: Vec<Option<usize>>,
}

impl<W: Load> Default for WorkerPool<W> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl<W: Load> WorkerPool<W> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            heap: Vec::with_capacity(capacity),
            position: Vec::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    #[inline]
    pub fn contains(&self, id: WorkerId) -> bool {
        matches!(self.position.get(id.0), Some(Some(_)))
    }

    /// Вставляет воркера и восстанавливает порядок кучи. O(log n).
    pub fn insert(&mut self, worker: W) {
        debug_assert!(
            !self.contains(worker.worker_id()),
            "worker {} is already in the pool",
            worker.worker_id()
        );
        let id = worker.worker_id().0;
        if id >= self.position.len() {
            self.position.resize(id + 1, None);
        }

        let idx = self.heap.len();
        self.heap.push(worker);
        self.position[id] = Some(idx);
        self.sift_up(idx);
    }

    /// Извлекает воркера с минимальной нагрузкой. O(log n).
    ///
    /// При равной нагрузке выбор произвольный.
    pub fn extract_min(&mut self) -> Option<W> {
        if self.heap.is_empty() {
            return None;
        }

        let last = self.heap.len() - 1;
        self.swap(0, last);
        let worker = self.heap.pop()?;
        self.position[worker.worker_id().0] = None;

        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Some(worker)
    }

    /// Меняет воркера на месте и чинит кучу от его текущей позиции.
    ///
    /// Замыкание не должно менять идентификатор воркера.
    /// Возвращает `None`, если воркера с таким id в пуле нет.
    pub fn update<T, F>(&mut self, id: WorkerId, f: F) -> Option<T>
    where
        F: FnOnce(&mut W) -> T,
    {
        let idx = (*self.position.get(id.0)?)?;
        let out = f(&mut self.heap[idx]);
        debug_assert_eq!(self.heap[idx].worker_id(), id);
        self.fix(idx);
        Some(out)
    }

    /// Нагрузка по воркерам, индекс = `WorkerId`.
    pub fn pending_by_worker(&self) -> Vec<usize> {
        let mut pending = vec![0; self.position.len()];
        for w in &self.heap {
            pending[w.worker_id().0] = w.pending();
        }
        pending
    }

    #[inline]
    fn less(&self, i: usize, j: usize) -> bool {
        self.heap[i].pending() < self.heap[j].pending()
    }

    #[inline]
    fn swap(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        self.position[self.heap[i].worker_id().0] = Some(i);
        self.position[self.heap[j].worker_id().0] = Some(j);
    }

    fn fix(&mut self, idx: usize) {
        if !self.sift_up(idx) {
            self.sift_down(idx);
        }
    }

    fn sift_up(&mut self, mut idx: usize) -> bool {
        let start = idx;
        while idx > 0 {
            let parent = (idx - 1) / 2;
            if !self.less(idx, parent) {
                break;
            }
            self.swap(idx, parent);
            idx = parent;
        }
        idx != start
    }

    fn sift_down(&mut self, mut idx: usize) {
        let n = self.heap.len();
        loop {
            let left = 2 * idx + 1;
            if left >= n {
                break;
            }
            let right = left + 1;
            let child = if right < n && self.less(right, left) { right } else { left };
            if !self.less(child, idx) {
                break;
            }
            self.swap(idx, child);
            idx = child;
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Slot {
        id: WorkerId,
        pending: usize,
    }

    impl Load for Slot {
        fn worker_id(&self) -> WorkerId {
            self.id
        }
        fn pending(&self) -> usize {
            self.pending
        }
    }

    fn pool_of(loads: &[usize]) -> WorkerPool<Slot> {
        let mut pool = WorkerPool::with_capacity(loads.len());
        for (i, &pending) in loads.iter().enumerate() {
            pool.insert(Slot { id: WorkerId(i), pending });
        }
        pool
    }

    fn assert_heap(pool: &WorkerPool<Slot>) {
        for i in 1..pool.heap.len() {
            let parent = (i - 1) / 2;
            assert!(pool.heap[parent].pending <= pool.heap[i].pending, "heap order broken at {i}");
        }
        for (idx, w) in pool.heap.iter().enumerate() {
            assert_eq!(pool.position[w.id.0], Some(idx), "stale position for {}", w.id);
        }
    }

    #[test]
    fn extract_min_yields_ascending_loads() {
        let mut pool = pool_of(&[5, 3, 9, 0, 7, 3]);
        assert_eq!(pool.len(), 6);
        assert_heap(&pool);

        let mut order = Vec::new();
        while let Some(w) = pool.extract_min() {
            order.push(w.pending);
            assert_heap(&pool);
        }
        assert_eq!(order, vec![0, 3, 3, 5, 7, 9]);
        assert!(pool.is_empty());
        assert!(pool.extract_min().is_none());
    }

    #[test]
    fn extracted_worker_is_absent_until_reinserted() {
        let mut pool = pool_of(&[1, 0]);
        let mut w = pool.extract_min().unwrap();
        assert_eq!(w.id, WorkerId(1));
        assert!(!pool.contains(WorkerId(1)));
        assert!(pool.update(WorkerId(1), |s| s.pending += 1).is_none());
        assert_eq!(pool.len(), 1);

        w.pending += 1;
        pool.insert(w);
        assert!(pool.contains(WorkerId(1)));
        assert_eq!(pool.len(), 2);
        assert_heap(&pool);
    }

    #[test]
    fn update_decrement_restores_order() {
        let mut pool = pool_of(&[2, 2, 2, 4]);
        // воркер 3 глубоко в куче, после декремента он должен всплыть
        pool.update(WorkerId(3), |s| s.pending -= 3).unwrap();
        assert_heap(&pool);
        assert_eq!(pool.heap[0].id, WorkerId(3));
    }

    #[test]
    fn update_increment_sinks_worker() {
        let mut pool = pool_of(&[0, 1, 1]);
        pool.update(WorkerId(0), |s| s.pending = 10).unwrap();
        assert_heap(&pool);
        assert_ne!(pool.heap[0].id, WorkerId(0));
        assert_eq!(pool.pending_by_worker()[0], 10);
    }

    #[test]
    fn pending_by_worker_is_indexed_by_id() {
        let pool = pool_of(&[4, 0, 2]);
        assert_eq!(pool.pending_by_worker(), vec![4, 0, 2]);
    }

    #[test]
    fn random_operations_keep_heap_order() {
        const WORKERS: usize = 16;
        let mut pool = pool_of(&[0; WORKERS]);
        let mut model = vec![0usize; WORKERS];

        let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut next = || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        for _ in 0..10_000 {
            if next() % 3 == 0 {
                let id = (next() as usize) % WORKERS;
                if model[id] > 0 {
                    model[id] -= 1;
                    pool.update(WorkerId(id), |s| s.pending -= 1).unwrap();
                }
            } else {
                let min = *model.iter().min().unwrap();
                let mut w = pool.extract_min().unwrap();
                assert_eq!(w.pending, min, "extracted worker is not least loaded");
                w.pending += 1;
                model[w.id.0] += 1;
                pool.insert(w);
            }
            assert_eq!(pool.len(), WORKERS);
        }
        assert_heap(&pool);
        assert_eq!(pool.pending_by_worker(), model);
    }
}
