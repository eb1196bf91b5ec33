//! The refcounted `Tunnel` handle returned to callers of `createTunnel` /
//! `createReverseTunnel`.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use tunnelmux_proto::TunnelId;

use crate::descriptor::TunnelDescriptor;
use crate::manager::ManagerInner;

struct TunnelState {
    id: TunnelId,
    descriptor: TunnelDescriptor,
    refcount: AtomicU32,
    closed: AtomicBool,
    manager: Weak<ManagerInner>,
}

/// A live tunnel. Two calls that resolve to the same [`TunnelDescriptor`]
/// receive clones of the same handle (identity-equal, sharing one
/// refcount), rather than two independently-closable objects.
#[derive(Clone)]
pub struct Tunnel(Arc<TunnelState>);

impl Tunnel {
    pub(crate) fn new(
        id: TunnelId,
        descriptor: TunnelDescriptor,
        initial_refcount: u32,
        manager: Weak<ManagerInner>,
    ) -> Self {
        Self(Arc::new(TunnelState {
            id,
            descriptor,
            refcount: AtomicU32::new(initial_refcount),
            closed: AtomicBool::new(false),
            manager,
        }))
    }

    pub fn id(&self) -> TunnelId {
        self.0.id
    }

    pub fn descriptor(&self) -> &TunnelDescriptor {
        &self.0.descriptor
    }

    pub fn refcount(&self) -> u32 {
        self.0.refcount.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn incref(&self) {
        self.0.refcount.fetch_add(1, Ordering::SeqCst);
    }

    /// Marks this handle closed without going through the normal
    /// decrement-and-maybe-teardown path. Used when the owning manager is
    /// itself closing and is tearing every tunnel down unconditionally.
    pub(crate) fn force_close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
    }

    /// Releases one reference. When the last reference is released, the
    /// underlying proxy/connector and all of its connections are torn down
    /// and a `closeProxy` is sent to the peer. Calling this more times than
    /// the tunnel was referenced, or on an already-closed tunnel, is a
    /// harmless no-op.
    pub async fn close(&self) {
        if self.0.closed.load(Ordering::SeqCst) {
            return;
        }

        let mut current = self.0.refcount.load(Ordering::SeqCst);
        loop {
            if current == 0 {
                return;
            }
            match self.0.refcount.compare_exchange(
                current,
                current - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }

        if current - 1 == 0 {
            self.0.closed.store(true, Ordering::SeqCst);
            if let Some(manager) = self.0.manager.upgrade() {
                manager
                    .teardown_initiated_tunnel(self.0.descriptor.clone(), self.0.id)
                    .await;
            }
        }
    }
}

impl PartialEq for Tunnel {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for Tunnel {}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("id", &self.0.id)
            .field("descriptor", &self.0.descriptor)
            .field("refcount", &self.refcount())
            .field("closed", &self.is_closed())
            .finish()
    }
}
