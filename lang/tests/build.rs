use std::path::Path;

use spinc::{
    compiler::{BuildError, Compiler, Options},
    frontend::OutlineCompiler,
    image::{self, ImageFormat, CHECKSUM_BIAS, EEPROM_SENTINEL},
    source::Loader,
    symbols,
};

const TOP: &str = "\
CON
  _clkmode = xtal1 + pll16x
  _xinfreq = 5_000_000

OBJ
  led : \"led\"

VAR
  long stack[8]

PUB main
  led.on(16)
  wait

PRI wait
  repeat

PRI unused_helper
  return
";

const LED: &str = "\
'' Drives one LED.
PUB on(pin)
  dira[pin] := 1
  outa[pin] := 1

PUB off(pin)
  outa[pin] := 0

PUB toggle(pin)
  !outa[pin]

PUB pulse(pin)
  on(pin)
  off(pin)

PUB dim(pin)
PUB blink(pin)
";

struct Project {
    dir: tempfile::TempDir,
}

impl Project {
    /// `top.spin` in the project root and `led.spin` in `lib/`.
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("lib")).unwrap();
        std::fs::write(dir.path().join("top.spin"), TOP).unwrap();
        std::fs::write(dir.path().join("lib/led.spin"), LED).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> String {
        self.dir.path().join(name).to_string_lossy().into_owned()
    }

    fn compiler(&self, options: Options) -> Compiler<OutlineCompiler> {
        let mut loader = Loader::new(vec![self.dir.path().join("lib")]);
        loader.add_file_dir(Path::new(&self.path("top.spin")));
        Compiler::new(loader, OutlineCompiler::new(), options).with_trace(std::io::sink())
    }

    fn image(&self, options: Options, format: ImageFormat) -> Vec<u8> {
        let build = self.compiler(options).build(&self.path("top.spin")).unwrap();
        image::compose(&build.root, format, 0x8000).unwrap()
    }
}

fn quiet() -> Options {
    Options {
        quiet: true,
        ..Options::default()
    }
}

fn eliminating() -> Options {
    Options {
        eliminate_unused: true,
        ..quiet()
    }
}

fn word(image: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([image[at], image[at + 1]])
}

#[test]
fn binary_image_of_a_two_object_program() {
    let image = Project::new().image(quiet(), ImageFormat::Binary);

    assert_eq!(&image[0..4], &80_000_000u32.to_le_bytes());
    assert_eq!(image[4], 0x6F);
    assert_eq!(word(&image, 6), 0x10);
    assert_eq!(word(&image, 8), 76);
    assert_eq!(word(&image, 10), 116);
    assert_eq!(word(&image, 12), 36);
    assert_eq!(word(&image, 14), 120);
    assert_eq!(image.len(), 76);

    // top's header long, then led's copy after top's 24 bytes
    assert_eq!(word(&image, 16), 24);
    assert_eq!((image[18], image[19]), (4, 1));
    assert_eq!(word(&image, 16 + 24), 36);

    let sum = image
        .iter()
        .fold(CHECKSUM_BIAS, |sum, &b| sum + u32::from(b));
    assert_eq!(sum % 256, 0);
}

#[test]
fn eeprom_image_carries_the_sentinel() {
    let image = Project::new().image(quiet(), ImageFormat::Eeprom);
    assert_eq!(image.len(), 0x8000);
    assert_eq!(&image[108..116], &EEPROM_SENTINEL);
}

#[test]
fn elimination_shrinks_and_is_deterministic() {
    let project = Project::new();
    let full = project.image(quiet(), ImageFormat::Binary);
    let first = project.image(eliminating(), ImageFormat::Binary);
    let second = project.image(eliminating(), ImageFormat::Binary);

    assert_eq!(first, second);
    assert_eq!(first.len(), 72);
    assert!(first.len() < full.len());
}

#[test]
fn repeated_builds_are_identical() {
    let project = Project::new();
    let first = project.image(quiet(), ImageFormat::Binary);
    let second = project.image(quiet(), ImageFormat::Binary);
    assert_eq!(first, second);
}

#[test]
fn elimination_keeps_the_referenced_methods() {
    let project = Project::new();
    let mut compiler = project.compiler(eliminating());
    let build = compiler.build(&project.path("top.spin")).unwrap();

    // led: ON at 28, the five unused methods share the stub at 29
    let led = &build.root.code[24..];
    let offsets: Vec<u16> = (0..6).map(|i| word(led, 4 + 4 * i)).collect();
    assert_eq!(offsets, vec![28, 29, 29, 29, 29, 29]);
}

#[test]
fn symbols_describe_the_root() {
    let project = Project::new();
    let build = project
        .compiler(quiet())
        .build(&project.path("top.spin"))
        .unwrap();
    assert_eq!(
        symbols::dump(&build.context.source, &build.context.symbols),
        vec![
            "CON, _clkmode, 1032",
            "CON, _xinfreq, 5000000",
            "PUB, main, 1, 0",
        ]
    );
}

#[test]
fn documentation_and_listing_cover_every_object() {
    let project = Project::new();
    let options = Options {
        doc: true,
        ..quiet()
    };
    let build = project
        .compiler(options)
        .build(&project.path("top.spin"))
        .unwrap();

    let doc = build.context.doc.unwrap();
    assert!(doc.contains("Object \"led.spin\" Interface:"));
    assert!(doc.contains("PUB  on(pin)\n"));
    assert!(doc.contains("Drives one LED."));
    assert_eq!(build.context.list.lines().count(), 2);
}

#[test]
fn every_open_is_logged() {
    let project = Project::new();
    let mut compiler = project.compiler(quiet());
    compiler.build(&project.path("top.spin")).unwrap();

    // top is read again after its child
    assert_eq!(compiler.loader.accessed.len(), 3);
    let unique: Vec<_> = compiler.loader.accessed.unique().collect();
    assert_eq!(unique.len(), 2);
    assert!(unique[1].ends_with("lib/led.spin"));
}

#[test]
fn child_errors_name_the_child() {
    let project = Project::new();
    std::fs::write(
        project.dir.path().join("lib/led.spin"),
        "CON\n  x = 1 +\nPUB on(pin)\n",
    )
    .unwrap();
    let error = project
        .compiler(quiet())
        .build(&project.path("top.spin"))
        .unwrap_err();
    assert!(matches!(error, BuildError::Positioned(_)));
    assert!(error.to_string().starts_with("led.spin(2:"), "{}", error);
}

#[test]
fn oversized_programs_exceed_the_memory_budget() {
    let project = Project::new();
    let options = Options {
        eeprom_size: 64,
        ..quiet()
    };
    let error = project
        .compiler(options)
        .build(&project.path("top.spin"))
        .unwrap_err();
    // 16 + 60 code + 32 var = 108 bytes
    assert!(matches!(
        error,
        BuildError::MemoryLimitExceeded { longs: 11, .. }
    ));
}

const SHARED_TOP: &str = "\
OBJ
  s : \"shared\"
  l : \"list\"

PUB main
  s.a
  l.run
";

const SHARED_LIST: &str = "\
OBJ
  s : \"shared\"

PUB run
";

const SHARED: &str = "PUB a\nPUB b\nPUB c\n";

/// Root code of `top` whose `shared` child is also used by `list`.
fn shared_child_root(options: Options) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("top.spin"), SHARED_TOP).unwrap();
    std::fs::write(dir.path().join("list.spin"), SHARED_LIST).unwrap();
    std::fs::write(dir.path().join("shared.spin"), SHARED).unwrap();

    let top = dir.path().join("top.spin");
    let mut loader = Loader::new(vec![]);
    loader.add_file_dir(&top);
    let mut compiler =
        Compiler::new(loader, OutlineCompiler::new(), options).with_trace(std::io::sink());
    compiler.build(&top.to_string_lossy()).unwrap().root.code
}

#[test]
fn shared_children_keep_methods_any_parent_uses() {
    let offsets = |code: &[u8]| -> Vec<u16> { (1..=3).map(|i| word(code, 4 * i)).collect() };

    // top: header, one method and two instances, then its stub padded to 20
    let full = shared_child_root(quiet());
    assert_eq!(offsets(&full[20..]), vec![16, 17, 18]);

    let code = shared_child_root(eliminating());
    assert_eq!(offsets(&code[20..]), vec![16, 17, 17]);
    // list sits at 40 and its own copy at 16 within it
    assert_eq!(&code[20..40], &code[56..76]);
}
