use base64::Engine;
use ldraw_resolver::{
    export_json, export_raw, load_color_table, load_library, CancelFlag, ColorCode, ColorScheme, ColorTable,
    DiagnosticKind, DocumentCache, DocumentSource, MemorySource, ResolveOptions, Resolver, SceneEventKind,
    SourceChain,
};
use pretty_assertions::assert_eq;
use std::fs;
use std::sync::Arc;

const COLORS: &str = "0 LDraw.org Configuration File\n\
0 !COLOUR Blue CODE 1 VALUE #0055BF EDGE #333333\n\
0 !COLOUR Red CODE 4 VALUE #C91A09 EDGE #333333\n\
0 !COLOUR Main_Colour CODE 16 VALUE #FFFF80 EDGE #333333\n\
0 !COLOUR Edge_Colour CODE 24 VALUE #7F7F7F EDGE #333333\n";

const PLATE: &str = "0 Plate 1 x 1\n0 Name: plate.dat\n0 !LDRAW_ORG Part\n\
3 16 0 0 0 20 0 0 0 0 20\n\
2 24 0 0 0 20 0 0\n";

fn png_base64() -> String {
    let img = image::RgbaImage::from_raw(1, 1, vec![0, 128, 255, 255]).unwrap();
    let mut out = std::io::Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    base64::engine::general_purpose::STANDARD.encode(out.into_inner())
}

fn car_mpd() -> String {
    format!(
        "0 FILE car.mpd\n\
0 Car\n\
1 4 0 0 0 1 0 0 0 1 0 0 0 1 chassis.ldr\n\
0 STEP\n\
1 1 0 -8 0 1 0 0 0 1 0 0 0 1 decal.dat\n\
0 NOFILE\n\
0 FILE chassis.ldr\n\
0 Chassis\n\
1 16 0 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n\
1 16 40 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n\
0 NOFILE\n\
0 FILE decal.dat\n\
0 Decal\n\
0 !LDRAW_ORG Unofficial_Part\n\
0 !TEXMAP START PLANAR 0 0 0 10 0 0 0 0 10 flag.png\n\
4 16 0 0 0 10 0 0 10 0 10 0 0 10\n\
0 !TEXMAP END\n\
0 !DATA flag.png\n\
0 !: {}\n",
        png_base64()
    )
}

fn car_resolver() -> Resolver {
    let model = MemorySource::new().with_document("car.mpd", car_mpd());
    let library = MemorySource::new().with_document("plate.dat", PLATE);
    let documents = Arc::new(DocumentCache::new(SourceChain::new().with(model).with(library)));
    Resolver::new(documents, Arc::new(ColorTable::from_config(COLORS)))
}

#[test]
fn test_mpd_pipeline() {
    let output = car_resolver().resolve("car.mpd", 16).unwrap();
    assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
    assert_eq!(output.root, "car.mpd");

    let documents: Vec<&str> = output.instances.iter().map(|i| i.key.document.as_str()).collect();
    assert_eq!(documents, vec!["plate.dat", "plate.dat", "decal.dat"]);
    assert_eq!(output.geometry.len(), 2);
    assert_eq!(output.instances[0].color, ColorCode::new("4"));
    assert_eq!(output.instances[2].color, ColorCode::new("1"));

    let decal = output.bucket(&output.instances[2]).unwrap();
    let uv = decal.faces[0].uv.as_ref().unwrap();
    assert_eq!(uv.texture, "flag.png");
    assert_eq!(output.textures["flag.png"].width, 1);

    let kinds: Vec<&SceneEventKind> = output.events.iter().map(|e| &e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            &SceneEventKind::SubmodelBegin {
                name: "chassis.ldr".into()
            },
            &SceneEventKind::SubmodelEnd {
                name: "chassis.ldr".into()
            },
            &SceneEventKind::Step,
        ]
    );

    // one plate triangle per instance plus the decal quad
    assert_eq!(output.triangle_count(), 4);
    let raw = export_raw(&output, &ColorTable::from_config(COLORS));
    // no BFC anywhere, so every face is emitted twice
    assert_eq!(raw.triangle_count(), 8);
    assert_eq!(raw.textures, vec!["flag.png".to_string()]);
    assert_eq!(raw.lines.len(), 2);
}

#[test]
fn test_native_and_z_up_agree_up_to_the_twist() {
    let native = car_resolver()
        .with_options(ResolveOptions::default().with_convention(ldraw_resolver::AxisConvention::Native))
        .resolve("car.mpd", 16)
        .unwrap();
    let z_up = car_resolver().resolve("car.mpd", 16).unwrap();
    let twist = ldraw_resolver::AxisConvention::ZUp.twist();

    for (a, b) in native.instances.iter().zip(&z_up.instances) {
        let a_bucket = native.bucket(a).unwrap();
        let b_bucket = z_up.bucket(b).unwrap();
        let a_world = a.placement.transform_point3(a_bucket.faces[0].vertices[1]);
        let b_world = b.placement.transform_point3(b_bucket.faces[0].vertices[1]);
        let expected = twist.transform_point3(a_world);
        assert!(b_world.abs_diff_eq(expected, 1e-3), "{:?} vs {:?}", b_world, expected);
    }
}

#[test]
fn test_library_directory_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("parts/s")).unwrap();
    fs::create_dir_all(root.join("models")).unwrap();
    fs::write(root.join("LDConfig.ldr"), COLORS).unwrap();
    fs::write(
        root.join("parts/3001.dat"),
        "0 Brick 2 x 4\n0 Name: 3001.dat\n0 !LDRAW_ORG Part UPDATE 2004-03\n0 BFC CERTIFY CCW\n\
1 16 0 0 0 1 0 0 0 1 0 0 0 1 s\\3001s01.dat\n\
4 16 0 0 0 40 0 0 40 0 20 0 0 20\n",
    )
    .unwrap();
    fs::write(
        root.join("parts/s/3001s01.dat"),
        "0 ~Brick 2 x 4 Sides\n0 !LDRAW_ORG Subpart\n0 BFC CERTIFY CCW\n3 16 0 0 0 0 24 0 40 0 0\n",
    )
    .unwrap();
    fs::write(
        root.join("models/House.ldr"),
        "0 House\n1 4 0 0 0 1 0 0 0 1 0 0 0 1 3001.DAT\n1 4 0 -24 0 1 0 0 0 1 0 0 0 1 3001.dat\n",
    )
    .unwrap();

    let documents = Arc::new(load_library(root).unwrap());
    let colors = Arc::new(load_color_table(&documents, ColorScheme::Ldraw));
    assert_eq!(colors.len(), 4);

    let output = Resolver::new(documents.clone(), colors)
        .resolve("house.ldr", 16)
        .unwrap();
    assert!(output.diagnostics.is_empty(), "{:?}", output.diagnostics);
    assert_eq!(output.instances.len(), 2);
    assert_eq!(output.geometry.len(), 1);
    let bucket = output.bucket(&output.instances[0]).unwrap();
    assert_eq!(bucket.faces.len(), 2);
    assert!(bucket.faces.iter().all(|f| !f.double_sided));
    assert!(documents.is_loaded("s/3001s01.dat"));

    let json: serde_json::Value = serde_json::from_str(&export_json(&output).unwrap()).unwrap();
    assert_eq!(json["root"], "house.ldr");
    assert_eq!(json["colors"]["4"]["name"], "Red");
}

#[test]
fn test_missing_parts_do_not_stop_the_run() {
    let source = MemorySource::new()
        .with_document(
            "main.ldr",
            "0 Main\n1 4 0 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n1 4 0 0 0 1 0 0 0 1 0 0 0 1 nowhere.dat\n\
1 4 20 0 0 1 0 0 0 1 0 0 0 1 plate.dat\n",
        )
        .with_document("plate.dat", PLATE);
    let output = Resolver::new(Arc::new(DocumentCache::new(source)), Arc::new(ColorTable::from_config(COLORS)))
        .resolve("main.ldr", 16)
        .unwrap();
    assert_eq!(output.instances.len(), 2);
    assert_eq!(output.diagnostics.len(), 1);
    assert_eq!(
        output.diagnostics[0].kind,
        DiagnosticKind::MissingReference {
            name: "nowhere.dat".into()
        }
    );
}

#[test]
fn test_invalid_requests_fail() {
    let resolver = Resolver::new(
        Arc::new(DocumentCache::new(MemorySource::new())),
        Arc::new(ColorTable::new()),
    );
    assert!(resolver.resolve("  ", 16).is_err());
    assert!(resolver.resolve("absent.ldr", 16).is_err());
}

#[test]
fn test_parallel_runs_share_the_cache() {
    let resolver = Arc::new(car_resolver());
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let resolver = resolver.clone();
            std::thread::spawn(move || resolver.resolve("car.mpd", 16).unwrap())
        })
        .collect();
    let outputs: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    for output in &outputs[1..] {
        assert_eq!(output.instances, outputs[0].instances);
        assert_eq!(output.events, outputs[0].events);
    }
}

/// Raises the cancel flag the moment a given document is fetched.
struct CancellingSource {
    inner: MemorySource,
    trigger: &'static str,
    cancel: CancelFlag,
}

impl DocumentSource for CancellingSource {
    fn fetch(&self, name: &str) -> Option<String> {
        if name == self.trigger {
            self.cancel.cancel();
        }
        self.inner.fetch(name)
    }
}

#[test]
fn test_cancellation_keeps_finished_instances_complete() {
    let cancel = CancelFlag::new();
    let source = CancellingSource {
        inner: MemorySource::new()
            .with_document(
                "main.ldr",
                "0 Main\n\
1 4 0 0 0 1 0 0 0 1 0 0 0 1 a.dat\n\
1 4 0 0 0 1 0 0 0 1 0 0 0 1 b.dat\n\
1 4 0 0 0 1 0 0 0 1 0 0 0 1 c.dat\n",
            )
            .with_document("a.dat", PLATE)
            .with_document("b.dat", PLATE)
            .with_document("c.dat", PLATE),
        trigger: "b.dat",
        cancel: cancel.clone(),
    };
    let output = Resolver::new(Arc::new(DocumentCache::new(source)), Arc::new(ColorTable::from_config(COLORS)))
        .with_cancel_flag(cancel)
        .resolve("main.ldr", 16)
        .unwrap();
    assert!(output.cancelled);
    assert_eq!(output.instances.len(), 2);
    for instance in &output.instances {
        assert_eq!(output.bucket(instance).unwrap().faces.len(), 1);
    }
}
