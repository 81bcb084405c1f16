//! Staging a program and its argument string into virtual machine
//! memory.
use tracing::{event, Level};

use super::error::{AllocationFailure, StartupFailure};
use super::machine::{ProgramHandle, ScratchPtr, VirtualMachine};

/// Converts an argument string into the bytes the virtual machine
/// expects: one byte per character, anything outside 7-bit ASCII
/// (and DEL) replaced by zero, followed by a terminating zero.
pub fn stage_argument(argument: &str) -> Vec<u8> {
    argument
        .chars()
        .map(|ch| match u8::try_from(u32::from(ch)) {
            Ok(b) if b < 127 => b,
            _ => 0,
        })
        .chain(std::iter::once(0))
        .collect()
}

/// A buffer in virtual machine memory which is freed when dropped.
struct ScratchBuffer<'a, M: VirtualMachine + ?Sized> {
    vm: &'a mut M,
    ptr: ScratchPtr,
}

impl<'a, M: VirtualMachine + ?Sized> ScratchBuffer<'a, M> {
    fn allocate(vm: &'a mut M, len: usize) -> Result<ScratchBuffer<'a, M>, AllocationFailure> {
        let ptr = vm.allocate(len)?;
        Ok(ScratchBuffer { vm, ptr })
    }
}

impl<M: VirtualMachine + ?Sized> Drop for ScratchBuffer<'_, M> {
    fn drop(&mut self) {
        self.vm.free(self.ptr);
    }
}

/// Loads `program` into the virtual machine, passing it `argument`.
///
/// The argument is staged in a scratch buffer which is always freed
/// before this function returns, whether or not the load succeeded.
pub fn load<M: VirtualMachine + ?Sized>(
    vm: &mut M,
    program: ProgramHandle,
    argument: &str,
) -> Result<(), StartupFailure> {
    let staged = stage_argument(argument);
    let mut scratch = ScratchBuffer::allocate(vm, staged.len())?;
    scratch.vm.write(scratch.ptr, &staged);
    event!(
        Level::DEBUG,
        "loading {program:?} with {} byte argument at {:?}",
        staged.len(),
        scratch.ptr
    );
    scratch.vm.load_program(program, scratch.ptr)?;
    Ok(())
}
