//! Interrupt stubs routing every bound vector to `common_interrupt`.

use x86_64::structures::idt::{InterruptDescriptorTable, InterruptStackFrame, PageFaultErrorCode};

use super::{InterruptVector, common_interrupt};

macro_rules! handlers {
    ($($name:ident => $vector:expr;)*) => {
        $(
            #[unsafe(link_section = ".interrupt_handlers")]
            extern "x86-interrupt" fn $name(stack_frame: InterruptStackFrame) {
                common_interrupt($vector, stack_frame, None);
            }
        )*
    };
}

macro_rules! handlers_with_error_code {
    ($($name:ident => $vector:expr;)*) => {
        $(
            #[unsafe(link_section = ".interrupt_handlers")]
            extern "x86-interrupt" fn $name(stack_frame: InterruptStackFrame, error_code: u64) {
                common_interrupt($vector, stack_frame, Some(error_code));
            }
        )*
    };
}

handlers! {
    divide_error_handler => InterruptVector::DIVIDE_ERROR.value();
    debug_handler => InterruptVector::DEBUG.value();
    nmi_handler => InterruptVector::NON_MASKABLE_INTERRUPT.value();
    breakpoint_handler => InterruptVector::BREAKPOINT.value();
    overflow_handler => InterruptVector::OVERFLOW.value();
    bound_range_exceeded_handler => InterruptVector::BOUND_RANGE_EXCEEDED.value();
    invalid_opcode_handler => InterruptVector::INVALID_OPCODE.value();
    device_not_available_handler => InterruptVector::DEVICE_NOT_AVAILABLE.value();
    coprocessor_segment_overrun_handler => InterruptVector::COPROCESSOR_SEGMENT_OVERRUN.value();
    x87_floating_point_handler => InterruptVector::X87_FLOATING_POINT_EXCEPTION.value();
    simd_floating_point_handler => InterruptVector::SIMD_FLOATING_POINT_EXCEPTION.value();
    virtualization_handler => InterruptVector::VIRTUALIZATION_EXCEPTION.value();
    hypervisor_injection_handler => InterruptVector::HV_INJECTION_EXCEPTION.value();
}

handlers_with_error_code! {
    invalid_tss_handler => InterruptVector::INVALID_TSS.value();
    segment_not_present_handler => InterruptVector::SEGMENT_NOT_PRESENT.value();
    stack_segment_fault_handler => InterruptVector::STACK_SEGMENT_FAULT.value();
    general_protection_fault_handler => InterruptVector::GENERAL_PROTECTION_FAULT.value();
    alignment_check_handler => InterruptVector::ALIGNMENT_CHECK.value();
    control_protection_handler => InterruptVector::CP_PROTECTION_EXCEPTION.value();
    vmm_communication_handler => InterruptVector::VMM_COMMUNICATION_EXCEPTION.value();
    security_exception_handler => InterruptVector::SECURITY_EXCEPTION.value();
}

// Local timer, keyboard and the other lines an I/O APIC can deliver (24 GSIs).
handlers! {
    local_timer_handler => InterruptVector::LOCAL_TIMER.value();
    keyboard_handler => InterruptVector::KEYBOARD.value();
    irq2_handler => 0x22;
    irq3_handler => 0x23;
    irq4_handler => 0x24;
    irq5_handler => 0x25;
    irq6_handler => 0x26;
    irq7_handler => 0x27;
    irq8_handler => 0x28;
    irq9_handler => 0x29;
    irq10_handler => 0x2A;
    irq11_handler => 0x2B;
    irq12_handler => 0x2C;
    irq13_handler => 0x2D;
    irq14_handler => 0x2E;
    irq15_handler => 0x2F;
    irq16_handler => 0x30;
    irq17_handler => 0x31;
    irq18_handler => 0x32;
    irq19_handler => 0x33;
    irq20_handler => 0x34;
    irq21_handler => 0x35;
    irq22_handler => 0x36;
    irq23_handler => 0x37;
    spurious_handler => InterruptVector::SPURIOUS.value();
}

#[unsafe(link_section = ".interrupt_handlers")]
extern "x86-interrupt" fn double_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: u64,
) -> ! {
    common_interrupt(
        InterruptVector::DOUBLE_FAULT.value(),
        stack_frame,
        Some(error_code),
    );
    panic!("returned from double fault handler");
}

#[unsafe(link_section = ".interrupt_handlers")]
extern "x86-interrupt" fn machine_check_handler(stack_frame: InterruptStackFrame) -> ! {
    common_interrupt(InterruptVector::MACHINE_CHECK.value(), stack_frame, None);
    panic!("returned from machine check handler");
}

#[unsafe(link_section = ".interrupt_handlers")]
extern "x86-interrupt" fn page_fault_handler(
    stack_frame: InterruptStackFrame,
    error_code: PageFaultErrorCode,
) {
    common_interrupt(
        InterruptVector::PAGE_FAULT.value(),
        stack_frame,
        Some(error_code.bits()),
    );
}

pub fn register_handlers(idt: &mut InterruptDescriptorTable, double_fault_ist_index: u16) {
    idt.divide_error.set_handler_fn(divide_error_handler);
    idt.debug.set_handler_fn(debug_handler);
    idt.non_maskable_interrupt.set_handler_fn(nmi_handler);
    idt.breakpoint.set_handler_fn(breakpoint_handler);
    idt.overflow.set_handler_fn(overflow_handler);
    idt.bound_range_exceeded
        .set_handler_fn(bound_range_exceeded_handler);
    idt.invalid_opcode.set_handler_fn(invalid_opcode_handler);
    idt.device_not_available
        .set_handler_fn(device_not_available_handler);
    // SAFETY: the index names the double-fault stack every core's TSS carries.
    unsafe {
        idt.double_fault
            .set_handler_fn(double_fault_handler)
            .set_stack_index(double_fault_ist_index);
    }
    idt[InterruptVector::COPROCESSOR_SEGMENT_OVERRUN.value()]
        .set_handler_fn(coprocessor_segment_overrun_handler);
    idt.invalid_tss.set_handler_fn(invalid_tss_handler);
    idt.segment_not_present
        .set_handler_fn(segment_not_present_handler);
    idt.stack_segment_fault
        .set_handler_fn(stack_segment_fault_handler);
    idt.general_protection_fault
        .set_handler_fn(general_protection_fault_handler);
    idt.page_fault.set_handler_fn(page_fault_handler);
    idt.x87_floating_point
        .set_handler_fn(x87_floating_point_handler);
    idt.alignment_check.set_handler_fn(alignment_check_handler);
    idt.machine_check.set_handler_fn(machine_check_handler);
    idt.simd_floating_point
        .set_handler_fn(simd_floating_point_handler);
    idt.virtualization.set_handler_fn(virtualization_handler);
    idt.cp_protection_exception
        .set_handler_fn(control_protection_handler);
    idt.hv_injection_exception
        .set_handler_fn(hypervisor_injection_handler);
    idt.vmm_communication_exception
        .set_handler_fn(vmm_communication_handler);
    idt.security_exception
        .set_handler_fn(security_exception_handler);

    let lines: [extern "x86-interrupt" fn(InterruptStackFrame); 24] = [
        local_timer_handler,
        keyboard_handler,
        irq2_handler,
        irq3_handler,
        irq4_handler,
        irq5_handler,
        irq6_handler,
        irq7_handler,
        irq8_handler,
        irq9_handler,
        irq10_handler,
        irq11_handler,
        irq12_handler,
        irq13_handler,
        irq14_handler,
        irq15_handler,
        irq16_handler,
        irq17_handler,
        irq18_handler,
        irq19_handler,
        irq20_handler,
        irq21_handler,
        irq22_handler,
        irq23_handler,
    ];
    for (offset, handler) in lines.into_iter().enumerate() {
        idt[InterruptVector::EXCEPTION_LIMIT + offset as u8].set_handler_fn(handler);
    }
    idt[InterruptVector::SPURIOUS.value()].set_handler_fn(spurious_handler);
}
