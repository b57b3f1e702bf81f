//! Thread/Task management module.
//!
//! `Scheduler` is the mechanism a scheduling policy drives: it creates and
//! deletes threads, answers "who is running", and switches the processor from
//! one thread to another. Which thread runs next is the caller's business.
//!
//! Threads are addressed by `ThreadId` (slot index + generation). Their
//! records come from a dedicated heap pool and each owns exactly one stack
//! page from the page allocator.

use core::alloc::Layout;
use core::ptr::NonNull;

use spin::Mutex;

use crate::kprintln;
use crate::mm::{AllocFlags, HeapPool, PageAllocator, PAGE_SIZE};

mod boot;
pub mod context;
mod thread;


pub use context::{ExitRoutine, StartArgs, ThreadEntry};
pub use thread::{ThreadId, ThreadState};

use context::Context;
use thread::Thread;

/// Capacidade da tabela de threads.
pub const MAX_THREADS: usize = 64;

#[derive(Clone, Copy)]
struct Slot {
    generation: u32,
    thread: Option<NonNull<Thread>>,
}

impl Slot {
    const EMPTY: Slot = Slot {
        generation: 0,
        thread: None,
    };
}

/// Contadores da tabela de threads.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SchedStats {
    pub threads: usize,
    pub record_allocs: usize,
    pub record_frees: usize,
    pub stack_allocs: usize,
    pub stack_frees: usize,
    pub switches: usize,
}

struct ThreadTable<P> {
    pages: P,
    pool: HeapPool,
    slots: [Slot; MAX_THREADS],
    running: Option<ThreadId>,
    booted: bool,
    stack_allocs: usize,
    stack_frees: usize,
    switches: usize,
}

// Single execution unit; the records behind the slots are only touched with
// the table locked or by the switch code for the two threads it moves.
unsafe impl<P: Send> Send for ThreadTable<P> {}

impl<P: PageAllocator> ThreadTable<P> {
    const fn new(pages: P) -> Self {
        Self {
            pages,
            pool: HeapPool::new("kernel threads pool"),
            slots: [Slot::EMPTY; MAX_THREADS],
            running: None,
            booted: false,
            stack_allocs: 0,
            stack_frees: 0,
            switches: 0,
        }
    }

    /// Ponteiro para o registro de `tid`; panics on a stale handle.
    fn thread_ptr(&self, tid: ThreadId) -> NonNull<Thread> {
        match self.slots.get(tid.index()) {
            Some(Slot {
                generation,
                thread: Some(p),
            }) if *generation == tid.generation() => *p,
            _ => panic!("thread: stale thread handle {}", tid),
        }
    }

    fn thread(&self, tid: ThreadId) -> &Thread {
        unsafe { self.thread_ptr(tid).as_ref() }
    }

    fn thread_mut(&mut self, tid: ThreadId) -> &mut Thread {
        unsafe { self.thread_ptr(tid).as_mut() }
    }

    fn running_tid(&self) -> ThreadId {
        match self.running {
            Some(tid) => tid,
            None => panic!("thread: no running thread before bootstrap"),
        }
    }

    /// Primeira arena do pool: uma página do alocador físico.
    fn boot(&mut self) {
        assert!(!self.booted, "thread: bootstrap called twice");
        self.booted = true;

        let page = match self.pages.alloc_page() {
            Some(page) => page,
            None => panic!("thread: no page for the thread pool"),
        };
        if let Err(e) = unsafe { self.pool.add_arena(page.start(), PAGE_SIZE as usize) } {
            panic!("thread: cannot add arena to '{}': {}", self.pool.name(), e);
        }
    }

    fn alloc_record(&mut self, name: &'static str) -> (ThreadId, NonNull<Thread>) {
        assert!(self.booted, "thread: '{}' created before bootstrap", name);

        let index = match self.slots.iter().position(|s| s.thread.is_none()) {
            Some(index) => index,
            None => panic!("thread: table full, cannot create '{}'", name),
        };
        let rec = match self.pool.alloc(Layout::new::<Thread>(), AllocFlags::ZERO) {
            Ok(p) => p.cast::<Thread>(),
            Err(e) => panic!("thread: cannot allocate '{}': {}", name, e),
        };
        (ThreadId::new(index, self.slots[index].generation), rec)
    }

    fn install(&mut self, tid: ThreadId, rec: NonNull<Thread>, thread: Thread) {
        unsafe { rec.as_ptr().write(thread) };
        self.slots[tid.index()].thread = Some(rec);
    }

    fn create_thread(
        &mut self,
        name: &'static str,
        entry: ThreadEntry,
        exit: ExitRoutine,
        args: &StartArgs,
    ) -> ThreadId {
        let (tid, rec) = self.alloc_record(name);

        let stack = match self.pages.alloc_page() {
            Some(page) => page,
            None => panic!("thread: no stack page for '{}'", name),
        };
        self.stack_allocs += 1;

        let context =
            unsafe { Context::for_new_thread(stack.end(), entry, exit, tid.to_raw(), args) };

        self.install(
            tid,
            rec,
            Thread {
                name,
                state: ThreadState::Ready,
                context,
                stack: Some(stack),
                csnest: 0,
            },
        );
        tid
    }

    fn delete_thread(&mut self, tid: ThreadId) {
        let rec = self.thread_ptr(tid);
        assert_ne!(
            self.running,
            Some(tid),
            "thread: cannot delete the running thread {}",
            tid
        );

        let td = unsafe { rec.as_ptr().read() };
        assert_eq!(
            td.csnest, 0,
            "thread: '{}' {} deleted inside a critical section",
            td.name, tid
        );

        let slot = &mut self.slots[tid.index()];
        slot.thread = None;
        slot.generation = slot.generation.wrapping_add(1);

        if let Some(stack) = td.stack {
            self.pages.free_page(stack);
            self.stack_frees += 1;
        }
        if let Err(e) = unsafe { self.pool.free(rec.cast(), Layout::new::<Thread>()) } {
            panic!("thread: cannot free '{}': {}", td.name, e);
        }

        kprintln!("thread: deleted '{}' {}", td.name, tid);
    }

    fn thread_count(&self) -> usize {
        self.slots.iter().filter(|s| s.thread.is_some()).count()
    }
}

/// Thread manager and context switch mechanism for one execution unit.
///
/// The running thread is a slot of this object rather than a global, so all
/// operations take `&self`. The inner lock only exists to make the object
/// usable from a `static`; it is never held across a register transfer.
pub struct Scheduler<P> {
    table: Mutex<ThreadTable<P>>,
    thread_exit: ExitRoutine,
}

impl<P: PageAllocator> Scheduler<P> {
    /// `pages` backs thread stacks and the thread pool; `thread_exit` is where
    /// a thread lands when its entry function returns.
    pub const fn new(pages: P, thread_exit: ExitRoutine) -> Self {
        Self {
            table: Mutex::new(ThreadTable::new(pages)),
            thread_exit,
        }
    }

    /// Runs `f` on the page allocator, e.g. to hand it memory at boot.
    pub fn with_pages<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        f(&mut self.table.lock().pages)
    }

    /// Creates a READY thread that will start at `entry` with zeroed arguments.
    ///
    /// Running out of table slots, pool memory or stack pages is fatal.
    pub fn create(&self, name: &'static str, entry: ThreadEntry) -> ThreadId {
        let mut t = self.table.lock();
        let tid = t.create_thread(name, entry, self.thread_exit, &StartArgs::NONE);
        kprintln!("thread: created '{}' {}", name, tid);
        tid
    }

    /// Destroys a thread that is not running, releasing its stack page and
    /// record. Stale handles and the running thread are fatal.
    pub fn delete(&self, tid: ThreadId) {
        self.table.lock().delete_thread(tid);
    }

    /// The running thread, read back from the identity slot of its context.
    pub fn current(&self) -> ThreadId {
        let t = self.table.lock();
        let tid = t.running_tid();
        ThreadId::from_raw(t.thread(tid).context.identity())
    }

    /// Transfers the processor from `current` to `next`.
    ///
    /// Does nothing if `next` is `None` or equals `current`. Otherwise
    /// `current` must be the running thread and must not be inside a critical
    /// section. Returns once some thread switches back to `current`.
    pub fn switch(&self, current: ThreadId, next: Option<ThreadId>) {
        let (old, new) = {
            let mut t = self.table.lock();

            let next = match next {
                Some(next) if next != current => next,
                _ => return,
            };
            assert_eq!(
                t.running,
                Some(current),
                "thread: switch away from {} which is not running",
                current
            );

            let mut cur_ptr = t.thread_ptr(current);
            let mut next_ptr = t.thread_ptr(next);
            // Handles distintos e vivos => registros distintos.
            let (cur, nt) = unsafe { (cur_ptr.as_mut(), next_ptr.as_mut()) };

            // Thread must not switch while in critical section!
            assert_eq!(
                cur.csnest, 0,
                "thread: '{}' {} switched away inside a critical section",
                cur.name, current
            );

            kprintln!(
                "thread: switching from '{}' {} to '{}' {}",
                cur.name,
                current,
                nt.name,
                next
            );

            cur.state = ThreadState::Ready;
            nt.state = ThreadState::Running;
            t.running = Some(next);
            t.switches += 1;

            (&mut cur.context as *mut Context, &nt.context as *const Context)
        };

        unsafe { context::context_switch(old, new) };
    }

    /// `switch` away from the running thread.
    pub fn switch_to(&self, next: Option<ThreadId>) {
        self.switch(self.current(), next);
    }

    /// Enters a critical section on the running thread.
    pub fn crit_enter(&self) {
        let mut t = self.table.lock();
        let tid = t.running_tid();
        t.thread_mut(tid).csnest += 1;
    }

    /// Leaves a critical section on the running thread. Unbalanced calls are
    /// fatal.
    pub fn crit_leave(&self) {
        let mut t = self.table.lock();
        let tid = t.running_tid();
        let td = t.thread_mut(tid);
        assert!(td.csnest > 0, "thread: '{}' left a critical section it never entered", td.name);
        td.csnest -= 1;
    }

    /// Critical section that ends when the guard is dropped.
    pub fn critical(&self) -> CritSection<'_, P> {
        self.crit_enter();
        CritSection { sched: self }
    }

    pub fn state(&self, tid: ThreadId) -> ThreadState {
        self.table.lock().thread(tid).state
    }

    pub fn name(&self, tid: ThreadId) -> &'static str {
        self.table.lock().thread(tid).name
    }

    pub fn crit_depth(&self, tid: ThreadId) -> u32 {
        self.table.lock().thread(tid).csnest
    }

    /// Whether `tid` still refers to a thread.
    pub fn is_live(&self, tid: ThreadId) -> bool {
        let t = self.table.lock();
        matches!(
            t.slots.get(tid.index()),
            Some(Slot { generation, thread: Some(_) }) if *generation == tid.generation()
        )
    }

    pub fn thread_count(&self) -> usize {
        self.table.lock().thread_count()
    }

    pub fn stats(&self) -> SchedStats {
        let t = self.table.lock();
        SchedStats {
            threads: t.thread_count(),
            record_allocs: t.pool.allocs(),
            record_frees: t.pool.frees(),
            stack_allocs: t.stack_allocs,
            stack_frees: t.stack_frees,
            switches: t.switches,
        }
    }
}

/// Guard returned by `Scheduler::critical`.
pub struct CritSection<'a, P: PageAllocator> {
    sched: &'a Scheduler<P>,
}

impl<P: PageAllocator> Drop for CritSection<'_, P> {
    fn drop(&mut self) {
        self.sched.crit_leave();
    }
}

/// Default exit routine: a thread whose entry function returned ends here.
pub extern "C" fn kernel_exit() -> ! {
    kprintln!("thread: entry function returned, halting");
    crate::arch::halt_loop();
}
