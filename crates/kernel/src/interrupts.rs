use core::sync::atomic::{AtomicU64, Ordering};

use pmm::HumanAddress;

use crate::arch::{self, apic, ps2};

static TIMER_TICKS: AtomicU64 = AtomicU64::new(0);
static SPURIOUS_INTERRUPTS: AtomicU64 = AtomicU64::new(0);

#[derive(Debug)]
pub struct InterruptContext {
    vector: arch::InterruptVector,
    state: arch::InterruptState,
    kind: InterruptKind,
}

impl InterruptContext {
    pub fn new(
        vector: arch::InterruptVector,
        state: arch::InterruptState,
        kind: InterruptKind,
    ) -> Self {
        Self {
            vector,
            state,
            kind,
        }
    }

    pub fn vector(&self) -> arch::InterruptVector {
        self.vector
    }

    /// Returns the instruction pointer at the time of the interrupt.
    pub fn instruction_pointer(&self) -> usize {
        self.state.instruction_pointer()
    }

    /// Returns the stack pointer at the time of the interrupt.
    pub fn stack_pointer(&self) -> usize {
        self.state.stack_pointer()
    }

    /// Returns the error code associated with the interrupt, if any.
    pub fn error_code(&self) -> Option<u64> {
        self.state.error_code()
    }

    /// Returns the kind of interrupt.
    pub fn kind(&self) -> &InterruptKind {
        &self.kind
    }
}

#[derive(Debug)]
pub enum InterruptKind {
    /// A CPU exception other than a page fault.
    Exception,
    PageFault {
        faulting_address: Option<usize>,
    },
    LocalTimer,
    Keyboard,
    /// Raised by the local APIC itself; never acknowledged.
    Spurious,
    /// Any other routed device line.
    External,
}

/// Timer interrupts taken on all cores since boot.
pub fn timer_ticks() -> u64 {
    TIMER_TICKS.load(Ordering::Relaxed)
}

pub fn spurious_interrupts() -> u64 {
    SPURIOUS_INTERRUPTS.load(Ordering::Relaxed)
}

pub fn interrupt_was_received(context: InterruptContext) {
    match context.kind() {
        InterruptKind::LocalTimer => {
            TIMER_TICKS.fetch_add(1, Ordering::Relaxed);
            apic::end_of_interrupt();
        }
        InterruptKind::Keyboard => {
            let scancode = ps2::read_scancode();
            log::trace!("scancode {:#04x}", scancode);
            apic::end_of_interrupt();
        }
        InterruptKind::Spurious => {
            SPURIOUS_INTERRUPTS.fetch_add(1, Ordering::Relaxed);
        }
        InterruptKind::External => {
            log::warn!("unexpected interrupt {}", context.vector());
            apic::end_of_interrupt();
        }
        InterruptKind::Exception | InterruptKind::PageFault { .. } => fatal_exception(&context),
    }
}

fn fatal_exception(context: &InterruptContext) -> ! {
    log::error!(
        "{} at {} (stack {}), error code {:?}",
        context.vector(),
        HumanAddress(context.instruction_pointer()),
        HumanAddress(context.stack_pointer()),
        context.error_code()
    );
    if let InterruptKind::PageFault {
        faulting_address: Some(address),
    } = context.kind()
    {
        log::error!("faulting address {}", HumanAddress(*address));
    }
    panic!(
        "unhandled {} exception after {} timer ticks",
        context.vector(),
        timer_ticks()
    );
}

#[macro_export]
macro_rules! interrupt_vectors {
    (
        $storage: ty,
        $(
            $name:ident = $value:expr,
        )*
    ) => {
        /// Represents an interrupt vector.
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub struct InterruptVector($storage);

        impl InterruptVector {
            $(
                pub const $name: Self = Self($value);
            )*

            /// Creates a new interrupt vector from a raw value.
            pub const fn new(value: $storage) -> Self {
                Self(value)
            }

            /// Returns the raw value of the interrupt vector.
            pub const fn value(&self) -> $storage {
                self.0
            }

            /// Returns the name of the interrupt vector, if known.
            pub fn name(&self) -> Option<&'static str> {
                match self.0 {
                    $(
                        $value => Some(stringify!($name)),
                    )*
                    _ => None,
                }
            }
        }

        impl core::fmt::Debug for InterruptVector {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                match self.name() {
                    Some(name) => write!(f, "InterruptVector::{}({:#04x})", name, self.0),
                    None => write!(f, "InterruptVector({:#04x})", self.0),
                }
            }
        }

        impl core::fmt::Display for InterruptVector {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                match self.name() {
                    Some(name) => f.write_str(name),
                    None => write!(f, "vector {:#04x}", self.0),
                }
            }
        }
    }
}
