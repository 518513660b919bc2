use chip8::{constants::*, prelude::*};

fn vm_with(program: &[u8]) -> Chip8Vm {
    let mut vm = Chip8Vm::new(Chip8Conf {
        rng_seed: Some(42),
        ..Default::default()
    });
    vm.load_bytecode(program).unwrap();
    vm
}

#[test]
fn test_set_and_add() {
    let mut vm = vm_with(&[0x60, 0x05, 0x70, 0x03]);
    vm.step();
    vm.step();

    assert_eq!(vm.cpu().registers()[0], 8);
    assert_eq!(vm.cpu().pc(), 0x204);
}

#[test]
fn test_power_on() {
    let vm = Chip8Vm::new(Chip8Conf::default());

    assert_eq!(vm.cpu().pc(), MEM_START);
    assert_eq!(vm.cpu().address(), 0);
    assert_eq!(vm.cpu().sp(), 0);
    assert_eq!(&vm.cpu().ram()[..FONTSET_DATA_LENGTH], &FONTSET[..]);
    assert!(vm.redraw_requested());
    assert!(vm.display_buffer().iter().all(|px| !px));
}

#[test]
fn test_oversized_image() {
    let mut vm = Chip8Vm::new(Chip8Conf::default());
    let image = vec![0x12; MAX_PROGRAM_SIZE + 1];

    match vm.load_bytecode(&image) {
        Err(Chip8Error::LargeProgram { size }) => assert_eq!(size, 3585),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(vm.cpu().ram()[MEM_START..].iter().all(|b| *b == 0));
}

#[test]
fn test_delay_timer_countdown() {
    // LD v0, 10 ; LD DT, v0
    let mut vm = vm_with(&[0x60, 0x0A, 0xF0, 0x15]);
    vm.run_steps(2);
    assert_eq!(vm.cpu().delay_timer(), 10);

    for _ in 0..60 {
        vm.tick_timers();
    }
    assert_eq!(vm.cpu().delay_timer(), 0);
}

/// Busy-waits on the delay timer, the way games pace themselves.
#[test]
#[rustfmt::skip]
fn test_delay_loop() {
    let mut vm = vm_with(&[
        0x60, 0x03, // 0x200: LD v0, 3
        0xF0, 0x15, // 0x202: LD DT, v0
        0xF1, 0x07, // 0x204: LD v1, DT
        0x31, 0x00, // 0x206: SE v1, 0
        0x12, 0x04, // 0x208: JP 0x204
        0x62, 0x01, // 0x20A: LD v2, 1
    ]);

    vm.run_steps(2);
    for _ in 0..3 {
        // Loop spins without progress until the timer ticks.
        vm.run_steps(30);
        assert_eq!(vm.cpu().registers()[2], 0);
        vm.tick_timers();
    }

    vm.run_steps(3);
    assert_eq!(vm.cpu().registers()[2], 1);
    assert_eq!(vm.cpu().pc(), 0x20C);
}

/// Prints the decimal digits of a register with the builtin font.
#[test]
#[rustfmt::skip]
fn test_print_decimal() {
    let mut vm = vm_with(&[
        0x60, 0xFF, // LD v0, 255
        0xA3, 0x00, // LD I, 0x300
        0xF0, 0x33, // LD B, v0
        0xF2, 0x65, // LD v2, [I]
        0x63, 0x00, // LD v3, 0     ; x
        0x64, 0x00, // LD v4, 0     ; y
        0xF0, 0x29, // LD F, v0     ; hundreds
        0xD3, 0x45, // DRW v3, v4, 5
        0x73, 0x05, // ADD v3, 5
        0xF1, 0x29, // LD F, v1     ; tens
        0xD3, 0x45, // DRW v3, v4, 5
        0x73, 0x05, // ADD v3, 5
        0xF2, 0x29, // LD F, v2     ; units
        0xD3, 0x45, // DRW v3, v4, 5
    ]);

    vm.run_steps(14);
    assert_eq!(&vm.cpu().registers()[0..3], &[2, 5, 5]);
    assert_eq!(vm.cpu().address(), 5 * 5);
    assert_eq!(vm.cpu().registers()[0xF], 0);

    let dump = vm.dump_display().unwrap();
    let rows: Vec<&str> = dump.lines().take(5).map(|row| &row[..15]).collect();
    assert_eq!(rows, vec![
        "####.####.####.",
        "...#.#....#....",
        "####.####.####.",
        "#.......#....#.",
        "####.####.####.",
    ]);
}

#[test]
#[rustfmt::skip]
fn test_nested_calls() {
    let mut vm = vm_with(&[
        0x22, 0x06, // 0x200: CALL 0x206
        0x61, 0x01, // 0x202: LD v1, 1
        0x12, 0x04, // 0x204: JP 0x204
        0x22, 0x0C, // 0x206: CALL 0x20C
        0x00, 0xEE, // 0x208: RET
        0x00, 0x00,
        0x70, 0x01, // 0x20C: ADD v0, 1
        0x00, 0xEE, // 0x20E: RET
    ]);

    vm.run_steps(3);
    assert_eq!(vm.cpu().stack(), &[0x200, 0x206]);

    vm.run_steps(3);
    assert_eq!(vm.cpu().sp(), 0);
    assert_eq!(vm.cpu().registers()[0], 1);
    assert_eq!(vm.cpu().registers()[1], 1);
    assert_eq!(vm.cpu().pc(), 0x204);
}

#[test]
fn test_reload_resets_machine() {
    let mut vm = vm_with(&[0x60, 0x05, 0xA3, 0x00, 0x22, 0x00]);
    vm.run_steps(3);
    assert_eq!(vm.cpu().sp(), 1);

    vm.load_bytecode(&[0x00, 0xE0]).unwrap();
    assert_eq!(vm.cpu().pc(), MEM_START);
    assert_eq!(vm.cpu().sp(), 0);
    assert_eq!(vm.cpu().address(), 0);
    assert_eq!(vm.cpu().registers()[0], 0);
    assert_eq!(vm.cpu().ram()[MEM_START + 2], 0, "previous program must not leak");
}

#[test]
fn test_disassemble_rom() {
    let rom = [0x60, 0x05, 0x70, 0x03, 0x12, 0x04];
    let mut buf = String::new();
    Disassembler::new(&rom).disassemble_all(&mut buf).unwrap();

    assert_eq!(
        buf,
        "0200: 6005  LD v0, 0x05\n0202: 7003  ADD v0, 0x03\n0204: 1204  JP 0x204\n"
    );
}
