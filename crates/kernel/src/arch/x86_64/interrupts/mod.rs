use x86_64::structures::idt::{
    InterruptDescriptorTable, InterruptStackFrame, InterruptStackFrameValue,
};

use super::gdt::DOUBLE_FAULT_IST_INDEX;
use crate::interrupts::{InterruptContext, InterruptKind, interrupt_was_received};

mod handlers;

static IDT: spin::Once<InterruptDescriptorTable> = spin::Once::new();

/// Builds the vector table shared by every core. Later calls are no-ops.
pub fn prepare() -> &'static InterruptDescriptorTable {
    IDT.call_once(|| {
        let mut idt = InterruptDescriptorTable::new();
        handlers::register_handlers(&mut idt, DOUBLE_FAULT_IST_INDEX);
        idt
    })
}

/// Loads the shared vector table on the calling core.
pub fn install() {
    prepare().load();
}

/// Common interrupt handler called by all interrupt stubs.
fn common_interrupt(vector: u8, stack_frame: InterruptStackFrame, error_code: Option<u64>) {
    let vector = InterruptVector::new(vector);
    let state = InterruptState::new(stack_frame, error_code);
    let kind = match vector {
        InterruptVector::LOCAL_TIMER => InterruptKind::LocalTimer,
        InterruptVector::KEYBOARD => InterruptKind::Keyboard,
        InterruptVector::SPURIOUS => InterruptKind::Spurious,
        InterruptVector::PAGE_FAULT => {
            let faulting_address = x86_64::registers::control::Cr2::read()
                .ok()
                .map(|v| v.as_u64() as usize);
            InterruptKind::PageFault { faulting_address }
        }
        v if v.is_exception() => InterruptKind::Exception,
        _ => InterruptKind::External,
    };

    interrupt_was_received(InterruptContext::new(vector, state, kind));
}

crate::interrupt_vectors! {
    u8,
    DIVIDE_ERROR = 0,
    DEBUG = 1,
    NON_MASKABLE_INTERRUPT = 2,
    BREAKPOINT = 3,
    OVERFLOW = 4,
    BOUND_RANGE_EXCEEDED = 5,
    INVALID_OPCODE = 6,
    DEVICE_NOT_AVAILABLE = 7,
    DOUBLE_FAULT = 8,
    COPROCESSOR_SEGMENT_OVERRUN = 9,
    INVALID_TSS = 10,
    SEGMENT_NOT_PRESENT = 11,
    STACK_SEGMENT_FAULT = 12,
    GENERAL_PROTECTION_FAULT = 13,
    PAGE_FAULT = 14,
    X87_FLOATING_POINT_EXCEPTION = 16,
    ALIGNMENT_CHECK = 17,
    MACHINE_CHECK = 18,
    SIMD_FLOATING_POINT_EXCEPTION = 19,
    VIRTUALIZATION_EXCEPTION = 20,
    CP_PROTECTION_EXCEPTION = 21,
    HV_INJECTION_EXCEPTION = 28,
    VMM_COMMUNICATION_EXCEPTION = 29,
    SECURITY_EXCEPTION = 30,
    LOCAL_TIMER = 0x20,
    KEYBOARD = 0x21,
    SPURIOUS = 0xFF,
}

impl InterruptVector {
    /// Vectors below this are reserved for CPU exceptions.
    pub const EXCEPTION_LIMIT: u8 = 0x20;

    pub const fn is_exception(&self) -> bool {
        self.0 < Self::EXCEPTION_LIMIT
    }
}

#[derive(Debug, Clone)]
pub struct InterruptState {
    stack_frame: InterruptStackFrameValue,
    error_code: Option<u64>,
}

impl InterruptState {
    pub fn new(stack_frame: InterruptStackFrame, error_code: Option<u64>) -> Self {
        Self {
            stack_frame: stack_frame.clone(),
            error_code,
        }
    }

    pub fn instruction_pointer(&self) -> usize {
        self.stack_frame.instruction_pointer.as_u64() as usize
    }

    pub fn stack_pointer(&self) -> usize {
        self.stack_frame.stack_pointer.as_u64() as usize
    }

    pub fn error_code(&self) -> Option<u64> {
        self.error_code
    }
}
