//! One-time bootstrap of the thread core.

use super::context::{self, Context, StartArgs, ThreadEntry};
use super::thread::{Thread, ThreadId, ThreadState};
use super::Scheduler;
use crate::kprintln;
use crate::mm::PageAllocator;

impl<P: PageAllocator> Scheduler<P> {
    /// Kernel bootstrap entry: creates the `main` thread and jumps into it.
    ///
    /// Seeds the thread pool with one page, builds `main` around `entry` with
    /// up to four start-up arguments, marks it RUNNING and loads its context.
    /// The caller's own context is abandoned.
    ///
    /// Must be called once, before any other thread operation; a second
    /// bootstrap is fatal.
    pub fn thread_init(&self, entry: ThreadEntry, args: impl Into<StartArgs>) -> ! {
        let args = args.into();

        let ctx = {
            let mut t = self.table.lock();
            t.boot();

            let tid = t.create_thread("main", entry, self.thread_exit, &args);
            t.running = Some(tid);
            let td = t.thread_mut(tid);
            td.state = ThreadState::Running;

            kprintln!("thread: activating '{}' {} thread!", td.name, tid);
            &td.context as *const Context
        };

        unsafe { context::context_load(ctx) }
    }

    /// Alternative bootstrap that turns the caller into the running thread.
    ///
    /// O boot thread usa a stack atual, então não há página de stack nem
    /// `TrapFrame`: o contexto é escrito pela primeira troca que sair dele.
    pub fn adopt_boot_thread(&self, name: &'static str) -> ThreadId {
        let mut t = self.table.lock();
        t.boot();

        let (tid, rec) = t.alloc_record(name);
        let mut context = Context::empty();
        context.set_identity(tid.to_raw());

        t.install(
            tid,
            rec,
            Thread {
                name,
                state: ThreadState::Running,
                context,
                stack: None,
                csnest: 0,
            },
        );
        t.running = Some(tid);

        kprintln!("thread: adopted '{}' {} as the running thread", name, tid);
        tid
    }
}
