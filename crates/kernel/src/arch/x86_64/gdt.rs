//! Per-core descriptor tables.
//!
//! Every core gets its own GDT and TSS built from the same template: kernel code and
//! data, user data and code, then the TSS. The TSS carries a dedicated stack for the
//! double-fault handler.

use bringup::{CoreId, MAX_CORES};
use spin::Once;
use x86_64::{
    VirtAddr,
    instructions::tables::load_tss,
    registers::segmentation::{CS, DS, ES, SS, Segment},
    structures::{
        gdt::{Descriptor, GlobalDescriptorTable, SegmentSelector},
        tss::TaskStateSegment,
    },
};

pub const DOUBLE_FAULT_IST_INDEX: u16 = 0;
const DOUBLE_FAULT_STACK_SIZE: usize = 4096 * 5;

#[repr(C, align(16))]
struct Stack([u8; DOUBLE_FAULT_STACK_SIZE]);

static mut DOUBLE_FAULT_STACKS: [Stack; MAX_CORES] =
    [const { Stack([0; DOUBLE_FAULT_STACK_SIZE]) }; MAX_CORES];

static TSS: [Once<TaskStateSegment>; MAX_CORES] = [const { Once::new() }; MAX_CORES];
static GDT: [Once<(GlobalDescriptorTable, Selectors)>; MAX_CORES] =
    [const { Once::new() }; MAX_CORES];

struct Selectors {
    code: SegmentSelector,
    data: SegmentSelector,
    tss: SegmentSelector,
}

fn tss(index: usize) -> &'static TaskStateSegment {
    TSS[index].call_once(|| {
        let mut tss = TaskStateSegment::new();
        // SAFETY: each core only ever takes the stack at its own index, once.
        let start = VirtAddr::from_ptr(unsafe { &raw const DOUBLE_FAULT_STACKS[index] });
        tss.interrupt_stack_table[DOUBLE_FAULT_IST_INDEX as usize] =
            start + DOUBLE_FAULT_STACK_SIZE as u64;
        tss
    })
}

fn gdt(index: usize) -> &'static (GlobalDescriptorTable, Selectors) {
    GDT[index].call_once(|| {
        let mut gdt = GlobalDescriptorTable::new();
        let code = gdt.append(Descriptor::kernel_code_segment());
        let data = gdt.append(Descriptor::kernel_data_segment());
        gdt.append(Descriptor::user_data_segment());
        gdt.append(Descriptor::user_code_segment());
        let tss = gdt.append(Descriptor::tss_segment(tss(index)));
        (gdt, Selectors { code, data, tss })
    })
}

/// Builds the tables of `core` on first use and loads them on the calling core.
pub fn load(core: CoreId) {
    let index = core.as_usize();
    assert!(index < MAX_CORES, "{} has no descriptor table slot", core);

    let (gdt, selectors) = gdt(index);
    gdt.load();
    // SAFETY: the selectors point into the table that was just loaded.
    unsafe {
        CS::set_reg(selectors.code);
        DS::set_reg(selectors.data);
        ES::set_reg(selectors.data);
        SS::set_reg(selectors.data);
        load_tss(selectors.tss);
    }
    log::trace!("{}: descriptor table loaded", core);
}
