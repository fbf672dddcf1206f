//! End-to-end guest execution through the registry: hand-assembled modules
//! run under both sandboxed backends.
//!
//! Entry-frame layout reminder for reading the assembly below: after the
//! dispatcher's `Enter 16`, the entry index lives at `Local 24` and argument
//! words at `Local 28`, `Local 32`, … Guest-to-guest calls pass their
//! arguments from `Arg 8` upward.

use std::cell::Cell;
use std::rc::Rc;

use modtime_environ::{ImageBuilder, ImageVersion, ModuleImage, Opcode};
use modtime_runtime::{
    BackendStrategy, CallError, ExecutionMode, InstanceOptions, ModuleSource, SyscallContext,
    SyscallHandler, VmRegistry,
};

struct EchoHandler;

impl SyscallHandler for EchoHandler {
    fn syscall(&self, _ctx: &mut SyscallContext<'_>, args: &[i32]) -> anyhow::Result<i32> {
        match args[0] {
            -1 => Ok(args[1]),
            other => anyhow::bail!("unexpected syscall {other}"),
        }
    }
}

fn options(strategy: BackendStrategy) -> InstanceOptions {
    InstanceOptions {
        strategy,
        ..Default::default()
    }
}

fn create_with(
    reg: &VmRegistry,
    name: &str,
    image: &ModuleImage,
    handler: Rc<dyn SyscallHandler>,
    opts: &InstanceOptions,
) {
    reg.create(name, ModuleSource::Image(image.clone()), handler, opts, None)
        .unwrap();
}

/// Runs `entry(args)` against a fresh registry under both backends and
/// checks the results agree before returning them.
fn run_both(image: &ModuleImage, entry: i32, args: &[i32]) -> Result<i32, (CallError, CallError)> {
    let _ = env_logger::try_init();
    let mut results = Vec::new();
    for strategy in [BackendStrategy::Interpreted, BackendStrategy::CompiledOnly] {
        let reg = VmRegistry::default();
        create_with(&reg, "mod", image, Rc::new(EchoHandler), &options(strategy));
        results.push(reg.call("mod", entry, args));
    }
    let compiled = results.pop().unwrap();
    let interpreted = results.pop().unwrap();
    match (interpreted, compiled) {
        (Ok(a), Ok(b)) => {
            assert_eq!(a, b, "backends disagree");
            Ok(a)
        }
        (Err(a), Err(b)) => Err((a, b)),
        (a, b) => panic!("one backend failed, the other did not: {a:?} vs {b:?}"),
    }
}

/// `fn(a, b) -> a + b`
fn add_image() -> ModuleImage {
    let mut b = ImageBuilder::new(ImageVersion::V1);
    b.op_w(Opcode::Enter, 16)
        .op_w(Opcode::Local, 28)
        .op(Opcode::Load32)
        .op_w(Opcode::Local, 32)
        .op(Opcode::Load32)
        .op(Opcode::Add)
        .op_w(Opcode::Leave, 16);
    ModuleImage::parse(&b.finish()).unwrap()
}

#[test]
fn arguments_marshal_and_add() {
    assert_eq!(run_both(&add_image(), 0, &[30, 12]).unwrap(), 42);
    assert_eq!(run_both(&add_image(), 0, &[-5, 3]).unwrap(), -2);
    // Unsupplied argument words are zero.
    assert_eq!(run_both(&add_image(), 0, &[7]).unwrap(), 7);
}

#[test]
fn entry_index_reaches_the_dispatcher() {
    // `fn() -> entry_index * 2`
    let mut b = ImageBuilder::new(ImageVersion::V1);
    b.op_w(Opcode::Enter, 16)
        .op_w(Opcode::Local, 24)
        .op(Opcode::Load32)
        .op_w(Opcode::Const, 2)
        .op(Opcode::Mul)
        .op_w(Opcode::Leave, 16);
    let image = ModuleImage::parse(&b.finish()).unwrap();
    assert_eq!(run_both(&image, 21, &[]).unwrap(), 42);
}

#[test]
fn syscall_echoes_argument() {
    // Issues syscall -1 with one marshaled argument, returns its result.
    let mut b = ImageBuilder::new(ImageVersion::V1);
    b.op_w(Opcode::Enter, 16)
        .op_w(Opcode::Const, 42)
        .op_b(Opcode::Arg, 8)
        .op_w(Opcode::Const, -1i32 as u32)
        .op(Opcode::Call)
        .op_w(Opcode::Leave, 16);
    let image = ModuleImage::parse(&b.finish()).unwrap();
    assert_eq!(run_both(&image, 0, &[]).unwrap(), 42);
}

/// `fn(n) -> sum(1..=n)` with a loop, locals, and a computed back-jump.
fn sum_image(version: ImageVersion) -> ModuleImage {
    let mut b = ImageBuilder::new(version);
    b.op_w(Opcode::Enter, 16) // 0
        .op_w(Opcode::Local, 8) // 1: &acc
        .op_w(Opcode::Const, 0) // 2
        .op(Opcode::Store32) // 3: acc = 0
        .op_w(Opcode::Local, 12) // 4: &i
        .op_w(Opcode::Const, 1) // 5
        .op(Opcode::Store32) // 6: i = 1
        // loop head (7): while i <= n
        .op_w(Opcode::Local, 12) // 7
        .op(Opcode::Load32) // 8: i
        .op_w(Opcode::Local, 28) // 9
        .op(Opcode::Load32) // 10: n
        .op_w(Opcode::Bgt, 27) // 11: i > n -> done
        .op_w(Opcode::Local, 8) // 12
        .op_w(Opcode::Local, 8) // 13
        .op(Opcode::Load32) // 14: acc
        .op_w(Opcode::Local, 12) // 15
        .op(Opcode::Load32) // 16: i
        .op(Opcode::Add) // 17
        .op(Opcode::Store32) // 18: acc += i
        .op_w(Opcode::Local, 12) // 19
        .op_w(Opcode::Local, 12) // 20
        .op(Opcode::Load32) // 21
        .op_w(Opcode::Const, 1) // 22
        .op(Opcode::Add) // 23
        .op(Opcode::Store32) // 24: i += 1
        .op_w(Opcode::Const, 7) // 25
        .op(Opcode::Jump) // 26: back to loop head
        .op_w(Opcode::Local, 8) // 27: done
        .op(Opcode::Load32) // 28
        .op_w(Opcode::Leave, 16); // 29
    if version == ImageVersion::V2 {
        b.jump_target(7);
    }
    ModuleImage::parse(&b.finish()).unwrap()
}

#[test]
fn loops_and_computed_jumps() {
    let image = sum_image(ImageVersion::V2);
    assert_eq!(run_both(&image, 0, &[10]).unwrap(), 55);
    assert_eq!(run_both(&image, 0, &[0]).unwrap(), 0);
    assert_eq!(run_both(&image, 0, &[1000]).unwrap(), 500_500);
}

#[test]
fn v1_computed_jumps_are_range_checked_only() {
    // No jump table in a v1 image; both backends accept any in-range target.
    let image = sum_image(ImageVersion::V1);
    assert_eq!(run_both(&image, 0, &[10]).unwrap(), 55);
}

#[test]
fn compiled_backend_rejects_non_whitelisted_jump() {
    // A v2 image whose computed jump is *not* in the jump table: the
    // compiled backend rejects it as a control-flow escape.
    let mut b = ImageBuilder::new(ImageVersion::V2);
    b.op_w(Opcode::Enter, 16) // 0
        .op_w(Opcode::Const, 4) // 1
        .op(Opcode::Jump) // 2: computed jump to 4, not whitelisted
        .op(Opcode::Push) // 3
        .op_w(Opcode::Const, 9) // 4
        .op_w(Opcode::Leave, 16) // 5
        .jump_target(3);
    let image = ModuleImage::parse(&b.finish()).unwrap();

    let reg = VmRegistry::default();
    create_with(
        &reg,
        "strict",
        &image,
        Rc::new(EchoHandler),
        &options(BackendStrategy::CompiledOnly),
    );
    assert!(matches!(
        reg.call("strict", 0, &[]),
        Err(CallError::JumpNotInTable { target: 4 })
    ));

    // The interpreter only range-checks computed jumps; the whitelist is a
    // compiled-backend check.
    let reg = VmRegistry::default();
    create_with(
        &reg,
        "loose",
        &image,
        Rc::new(EchoHandler),
        &options(BackendStrategy::Interpreted),
    );
    assert_eq!(reg.call("loose", 0, &[]).unwrap(), 9);
}

#[test]
fn jump_outside_module_aborts_the_call() {
    let mut b = ImageBuilder::new(ImageVersion::V1);
    b.op_w(Opcode::Enter, 16)
        .op_w(Opcode::Const, 0x7fff_0000)
        .op(Opcode::Jump)
        .op_w(Opcode::Leave, 16);
    let image = ModuleImage::parse(&b.finish()).unwrap();
    let (interp_err, compiled_err) = run_both(&image, 0, &[]).unwrap_err();
    assert!(matches!(interp_err, CallError::BadTarget { .. }));
    assert!(matches!(compiled_err, CallError::BadTarget { .. }));
}

#[test]
fn recursion_through_guest_calls() {
    // `fact(n)`, calling itself through the dispatcher convention.
    let mut b = ImageBuilder::new(ImageVersion::V1);
    b.op_w(Opcode::Enter, 16) // 0
        .op_w(Opcode::Local, 28) // 1
        .op(Opcode::Load32) // 2: n
        .op_w(Opcode::Const, 2) // 3
        .op_w(Opcode::Blt, 16) // 4: n < 2 -> base case
        .op_w(Opcode::Local, 28) // 5
        .op(Opcode::Load32) // 6
        .op_w(Opcode::Const, 1) // 7
        .op(Opcode::Sub) // 8: n - 1
        .op_b(Opcode::Arg, 12) // 9: outgoing argument slot
        .op_w(Opcode::Const, 0) // 10
        .op(Opcode::Call) // 11: fact(n - 1)
        .op_w(Opcode::Local, 28) // 12
        .op(Opcode::Load32) // 13
        .op(Opcode::Mul) // 14
        .op_w(Opcode::Leave, 16) // 15
        .op_w(Opcode::Const, 1) // 16: base case
        .op_w(Opcode::Leave, 16); // 17
    let image = ModuleImage::parse(&b.finish()).unwrap();
    assert_eq!(run_both(&image, 0, &[1]).unwrap(), 1);
    assert_eq!(run_both(&image, 0, &[5]).unwrap(), 120);
    assert_eq!(run_both(&image, 0, &[12]).unwrap(), 479_001_600);
}

#[test]
fn memory_and_block_copy() {
    // Copies the 8-byte literal at its data address to bss and reads a word
    // back from the copy.
    let mut b = ImageBuilder::new(ImageVersion::V1);
    b.op_w(Opcode::Enter, 16)
        .op_w(Opcode::Const, 64) // dest (bss)
        .op_w(Opcode::Const, 0) // src (data)
        .op_w(Opcode::Copy, 8)
        .op_w(Opcode::Const, 68)
        .op(Opcode::Load32)
        .op_w(Opcode::Leave, 16)
        .data_word(0x1111_2222)
        .data_word(0x3333_4444)
        .bss(64);
    let image = ModuleImage::parse(&b.finish()).unwrap();
    assert_eq!(run_both(&image, 0, &[]).unwrap(), 0x3333_4444);
}

#[test]
fn wild_scalar_writes_wrap_but_copy_faults() {
    // A store through a wild address wraps into the sandbox (and the call
    // succeeds); a block copy with a wild destination faults.
    let mut b = ImageBuilder::new(ImageVersion::V1);
    b.op_w(Opcode::Enter, 16)
        .op_w(Opcode::Const, 0xdead_0040) // wild address, masks to 0x40-ish
        .op_w(Opcode::Const, 7)
        .op(Opcode::Store32)
        .op_w(Opcode::Const, 1)
        .op_w(Opcode::Leave, 16)
        .bss(256);
    let image = ModuleImage::parse(&b.finish()).unwrap();
    assert_eq!(run_both(&image, 0, &[]).unwrap(), 1);

    let mut b = ImageBuilder::new(ImageVersion::V1);
    b.op_w(Opcode::Enter, 16)
        .op_w(Opcode::Const, 0xdead_0040)
        .op_w(Opcode::Const, 0)
        .op_w(Opcode::Copy, 8)
        .op_w(Opcode::Const, 1)
        .op_w(Opcode::Leave, 16)
        .bss(256);
    let image = ModuleImage::parse(&b.finish()).unwrap();
    let (interp_err, _) = run_both(&image, 0, &[]).unwrap_err();
    assert!(matches!(interp_err, CallError::CopyOutOfRange { .. }));
}

#[test]
fn divide_by_zero_is_a_guest_fault() {
    let mut b = ImageBuilder::new(ImageVersion::V1);
    b.op_w(Opcode::Enter, 16)
        .op_w(Opcode::Const, 7)
        .op_w(Opcode::Local, 28)
        .op(Opcode::Load32)
        .op(Opcode::Div)
        .op_w(Opcode::Leave, 16);
    let image = ModuleImage::parse(&b.finish()).unwrap();
    assert_eq!(run_both(&image, 0, &[2]).unwrap(), 3);
    let (err, _) = run_both(&image, 0, &[0]).unwrap_err();
    assert!(matches!(err, CallError::DivideByZero { .. }));
}

#[test]
fn fuel_exhausts_identically_on_both_backends() {
    // An infinite loop: Const 1; Jump back to it via instruction 1.
    let mut b = ImageBuilder::new(ImageVersion::V1);
    b.op_w(Opcode::Enter, 16) // 0
        .op_w(Opcode::Const, 1) // 1
        .op(Opcode::Jump) // 2 -> 1
        .op_w(Opcode::Leave, 16); // 3
    let image = ModuleImage::parse(&b.finish()).unwrap();

    for strategy in [BackendStrategy::Interpreted, BackendStrategy::CompiledOnly] {
        let reg = VmRegistry::default();
        let opts = InstanceOptions {
            strategy,
            fuel: Some(10_000),
            ..Default::default()
        };
        create_with(&reg, "spin", &image, Rc::new(EchoHandler), &opts);
        assert!(matches!(
            reg.call("spin", 0, &[]),
            Err(CallError::FuelExhausted { budget: 10_000 })
        ));
    }

    // With enough fuel, a terminating program is unaffected.
    let add = add_image();
    let reg = VmRegistry::default();
    let opts = InstanceOptions {
        fuel: Some(100),
        ..Default::default()
    };
    create_with(&reg, "add", &add, Rc::new(EchoHandler), &opts);
    assert_eq!(reg.call("add", 0, &[1, 2]).unwrap(), 3);
}

#[test]
fn guest_stack_overflow_is_fatal_per_call() {
    // Unbounded recursion: overflow must abort the call, not the process,
    // and the VM must stay callable afterwards.
    let mut b = ImageBuilder::new(ImageVersion::V1);
    b.op_w(Opcode::Enter, 4096) // 0
        .op_w(Opcode::Const, 0) // 1
        .op(Opcode::Call) // 2: call self forever
        .op_w(Opcode::Leave, 4096); // 3
    let image = ModuleImage::parse(&b.finish()).unwrap();
    let (err, _) = run_both(&image, 0, &[]).unwrap_err();
    assert!(matches!(err, CallError::StackOverflow { .. }));

    let reg = VmRegistry::default();
    create_with(
        &reg,
        "deep",
        &image,
        Rc::new(EchoHandler),
        &options(BackendStrategy::Interpreted),
    );
    assert!(reg.call("deep", 0, &[]).is_err());
    // The failed call restored the stack pointer; a harmless add module
    // would run, but the same instance must also still enter cleanly.
    assert!(matches!(
        reg.call("deep", 0, &[]),
        Err(CallError::StackOverflow { .. })
    ));
}

#[test]
fn nested_calls_restore_the_active_vm() {
    // VM `outer` issues syscall -2; the handler calls VM `inner` entry 0,
    // which returns 7; the handler hands that back into `outer`, which adds
    // its own argument.
    struct Bouncer {
        checked: Rc<Cell<bool>>,
    }
    impl SyscallHandler for Bouncer {
        fn syscall(&self, ctx: &mut SyscallContext<'_>, args: &[i32]) -> anyhow::Result<i32> {
            assert_eq!(args[0], -2);
            assert_eq!(ctx.active_vm().as_deref(), Some("outer"));
            let inner = ctx.call("inner", 0, &[])?;
            // The nested call popped itself off the active stack.
            assert_eq!(ctx.active_vm().as_deref(), Some("outer"));
            self.checked.set(true);
            Ok(inner)
        }
    }

    // inner: returns 7.
    let mut b = ImageBuilder::new(ImageVersion::V1);
    b.op_w(Opcode::Enter, 16)
        .op_w(Opcode::Const, 7)
        .op_w(Opcode::Leave, 16);
    let inner = ModuleImage::parse(&b.finish()).unwrap();

    // outer: syscall -2, then add arg0.
    let mut b = ImageBuilder::new(ImageVersion::V1);
    b.op_w(Opcode::Enter, 16)
        .op_w(Opcode::Const, -2i32 as u32)
        .op(Opcode::Call)
        .op_w(Opcode::Local, 28)
        .op(Opcode::Load32)
        .op(Opcode::Add)
        .op_w(Opcode::Leave, 16);
    let outer = ModuleImage::parse(&b.finish()).unwrap();

    let reg = VmRegistry::default();
    let checked = Rc::new(Cell::new(false));
    create_with(
        &reg,
        "outer",
        &outer,
        Rc::new(Bouncer {
            checked: Rc::clone(&checked),
        }),
        &InstanceOptions::default(),
    );
    create_with(
        &reg,
        "inner",
        &inner,
        Rc::new(EchoHandler),
        &InstanceOptions::default(),
    );

    assert_eq!(reg.call("outer", 0, &[10]).unwrap(), 17);
    assert!(checked.get());
    assert_eq!(reg.active_vm(), None);
    // `inner` is unaffected and still independently callable.
    assert_eq!(reg.call("inner", 0, &[]).unwrap(), 7);
}

#[test]
fn reentering_the_same_vm_nests_frames() {
    // Guest asks the host for `depth` via syscall -3; the handler re-enters
    // the same VM with depth-1 until it bottoms out.
    struct Recurser;
    impl SyscallHandler for Recurser {
        fn syscall(&self, ctx: &mut SyscallContext<'_>, args: &[i32]) -> anyhow::Result<i32> {
            assert_eq!(args[0], -3);
            let depth = args[1];
            assert_eq!(ctx.vm_name(), "self");
            if depth == 0 {
                Ok(100)
            } else {
                Ok(ctx.call("self", 0, &[depth - 1])? + 1)
            }
        }
    }

    // Entry: pass arg0 to syscall -3, return its result.
    let mut b = ImageBuilder::new(ImageVersion::V1);
    b.op_w(Opcode::Enter, 16)
        .op_w(Opcode::Local, 28)
        .op(Opcode::Load32)
        .op_b(Opcode::Arg, 8)
        .op_w(Opcode::Const, -3i32 as u32)
        .op(Opcode::Call)
        .op_w(Opcode::Leave, 16);
    let image = ModuleImage::parse(&b.finish()).unwrap();

    for strategy in [BackendStrategy::Interpreted, BackendStrategy::CompiledOnly] {
        let reg = VmRegistry::default();
        create_with(&reg, "self", &image, Rc::new(Recurser), &options(strategy));
        assert_eq!(reg.call("self", 0, &[4]).unwrap(), 104);
    }
}

#[test]
fn syscall_failure_aborts_only_that_call() {
    struct Failing;
    impl SyscallHandler for Failing {
        fn syscall(&self, _ctx: &mut SyscallContext<'_>, args: &[i32]) -> anyhow::Result<i32> {
            if args[0] == -1 {
                anyhow::bail!("renderer offline")
            }
            Ok(0)
        }
    }

    let mut b = ImageBuilder::new(ImageVersion::V1);
    b.op_w(Opcode::Enter, 16)
        .op_w(Opcode::Const, -1i32 as u32)
        .op(Opcode::Call)
        .op_w(Opcode::Leave, 16);
    let image = ModuleImage::parse(&b.finish()).unwrap();

    let reg = VmRegistry::default();
    create_with(
        &reg,
        "mod",
        &image,
        Rc::new(Failing),
        &InstanceOptions::default(),
    );
    match reg.call("mod", 0, &[]) {
        Err(CallError::Host { number: -1, .. }) => {}
        other => panic!("expected host error, got {other:?}"),
    }
    assert_eq!(reg.active_vm(), None);
    assert!(reg.contains("mod"));
}

#[test]
fn restart_resets_guest_data_between_calls() {
    // Entry 0: increment the counter word at data address 0 and return it.
    let mut b = ImageBuilder::new(ImageVersion::V1);
    b.op_w(Opcode::Enter, 16)
        .op_w(Opcode::Const, 0)
        .op_w(Opcode::Const, 0)
        .op(Opcode::Load32)
        .op_w(Opcode::Const, 1)
        .op(Opcode::Add)
        .op(Opcode::Store32)
        .op_w(Opcode::Const, 0)
        .op(Opcode::Load32)
        .op_w(Opcode::Leave, 16)
        .data_word(100);
    let image = ModuleImage::parse(&b.finish()).unwrap();

    let reg = VmRegistry::default();
    create_with(
        &reg,
        "counter",
        &image,
        Rc::new(EchoHandler),
        &InstanceOptions::default(),
    );
    assert_eq!(reg.call("counter", 0, &[]).unwrap(), 101);
    assert_eq!(reg.call("counter", 0, &[]).unwrap(), 102);
    reg.restart("counter").unwrap();
    assert_eq!(reg.call("counter", 0, &[]).unwrap(), 101);
}

#[test]
fn undef_and_break_fault() {
    for opcode in [Opcode::Undef, Opcode::Break] {
        let mut b = ImageBuilder::new(ImageVersion::V1);
        b.op_w(Opcode::Enter, 16)
            .op(opcode)
            .op_w(Opcode::Leave, 16);
        let image = ModuleImage::parse(&b.finish()).unwrap();
        let (err, _) = run_both(&image, 0, &[]).unwrap_err();
        assert!(matches!(err, CallError::IllegalInstruction { pc: 1, .. }));
    }
}

#[test]
fn float_arithmetic_matches_across_backends() {
    // (a + b) * a as f32, inputs arriving as raw bit patterns.
    let mut b = ImageBuilder::new(ImageVersion::V1);
    b.op_w(Opcode::Enter, 16)
        .op_w(Opcode::Local, 28)
        .op(Opcode::Load32)
        .op_w(Opcode::Local, 32)
        .op(Opcode::Load32)
        .op(Opcode::FAdd)
        .op_w(Opcode::Local, 28)
        .op(Opcode::Load32)
        .op(Opcode::FMul)
        .op_w(Opcode::Leave, 16);
    let image = ModuleImage::parse(&b.finish()).unwrap();

    let a = 1.5f32.to_bits() as i32;
    let b_ = 2.25f32.to_bits() as i32;
    let result = run_both(&image, 0, &[a, b_]).unwrap();
    assert_eq!(f32::from_bits(result as u32), (1.5 + 2.25) * 1.5);
}

#[test]
fn describe_reports_mode_and_sizes() {
    let image = add_image();
    let reg = VmRegistry::default();
    create_with(
        &reg,
        "mod",
        &image,
        Rc::new(EchoHandler),
        &options(BackendStrategy::Interpreted),
    );
    let desc = reg.describe("mod").unwrap();
    assert_eq!(desc.mode, ExecutionMode::Interpreted);
    assert_eq!(desc.code_size, image.header().code_len);
    assert_eq!(desc.symbol_count, 0);
}

#[test]
fn profiling_counts_guest_calls() {
    // fact(3) through the profiled dispatcher: one entry call plus two
    // recursive guest calls attributed to the `fact` symbol.
    let mut b = ImageBuilder::new(ImageVersion::V1);
    b.op_w(Opcode::Enter, 16) // 0
        .op_w(Opcode::Local, 28)
        .op(Opcode::Load32)
        .op_w(Opcode::Const, 2)
        .op_w(Opcode::Blt, 16)
        .op_w(Opcode::Local, 28)
        .op(Opcode::Load32)
        .op_w(Opcode::Const, 1)
        .op(Opcode::Sub)
        .op_b(Opcode::Arg, 12)
        .op_w(Opcode::Const, 0)
        .op(Opcode::Call)
        .op_w(Opcode::Local, 28)
        .op(Opcode::Load32)
        .op(Opcode::Mul)
        .op_w(Opcode::Leave, 16)
        .op_w(Opcode::Const, 1) // 16
        .op_w(Opcode::Leave, 16);
    let image = ModuleImage::parse(&b.finish()).unwrap();

    let reg = VmRegistry::default();
    reg.create(
        "fact",
        ModuleSource::Image(image),
        Rc::new(EchoHandler),
        &InstanceOptions {
            profiling: true,
            ..Default::default()
        },
        Some("0 fact\n"),
    )
    .unwrap();
    assert_eq!(reg.call("fact", 0, &[3]).unwrap(), 6);

    let report = reg.profile_report("fact").unwrap();
    assert!(report.contains("fact"), "report was: {report}");
    assert!(report.contains("total: 3"), "report was: {report}");
    // Counters reset after reporting.
    assert_eq!(reg.profile_report("fact").unwrap(), "no profile data\n");
}
