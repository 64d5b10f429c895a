//! End-to-end tests for slm-prep.
//!
//! These run the stages through real files in temporary directories, from
//! mesh to parameter report, and check the behaviour each stage promises.

use std::path::Path;

use approx::assert_relative_eq;
use nalgebra::{Point2, Point3};
use slm_prep::extrude::extrude_region;
use slm_prep::layers::layer_file_name;
use slm_prep::machine::{read_machine_file, write_machine_file};
use slm_prep::params::scan_layer_files;
use slm_prep::{
    Contour, IssueSeverity, LayerIssue, LayerSet, LayerSetKind, Mesh, Pipeline, PipelinePlan,
    PrepError, ProcessConfig, Segment, SimplifyParams, SliceConfig, Stage, SupportParams, Vertex,
    check_integrity, generate_supports, simplify, slice_mesh,
};
use tempfile::TempDir;

/// Create a cube from the origin to `size` with outward winding.
fn create_test_cube(size: f64) -> Mesh {
    let mut mesh = Mesh::new();

    mesh.vertices.push(Vertex::from_coords(0.0, 0.0, 0.0)); // 0
    mesh.vertices.push(Vertex::from_coords(size, 0.0, 0.0)); // 1
    mesh.vertices.push(Vertex::from_coords(size, size, 0.0)); // 2
    mesh.vertices.push(Vertex::from_coords(0.0, size, 0.0)); // 3
    mesh.vertices.push(Vertex::from_coords(0.0, 0.0, size)); // 4
    mesh.vertices.push(Vertex::from_coords(size, 0.0, size)); // 5
    mesh.vertices.push(Vertex::from_coords(size, size, size)); // 6
    mesh.vertices.push(Vertex::from_coords(0.0, size, size)); // 7

    // Bottom
    mesh.faces.push([0, 2, 1]);
    mesh.faces.push([0, 3, 2]);
    // Top
    mesh.faces.push([4, 5, 6]);
    mesh.faces.push([4, 6, 7]);
    // Front
    mesh.faces.push([0, 1, 5]);
    mesh.faces.push([0, 5, 4]);
    // Back
    mesh.faces.push([3, 7, 6]);
    mesh.faces.push([3, 6, 2]);
    // Left
    mesh.faces.push([0, 4, 7]);
    mesh.faces.push([0, 7, 3]);
    // Right
    mesh.faces.push([1, 2, 6]);
    mesh.faces.push([1, 6, 5]);

    mesh
}

/// A 10 mm block with a tab hanging off +X whose underside rises at 45°.
fn create_tab_part() -> Mesh {
    let profile = Contour::new(vec![
        Point2::new(0.0, 0.0),
        Point2::new(10.0, 0.0),
        Point2::new(10.0, 5.0),
        Point2::new(15.0, 10.0),
        Point2::new(0.0, 10.0),
    ]);
    let mut mesh = extrude_region(&profile, &[], 0.0, 10.0).unwrap();
    for v in &mut mesh.vertices {
        let p = v.position;
        v.position = Point3::new(p.x, p.z, p.y);
    }
    mesh.flip_faces();
    mesh
}

/// Configuration small enough for fast runs on a 10 mm cube.
fn test_config() -> ProcessConfig {
    let mut config = ProcessConfig::default();
    config.slice.layer_thickness = 2.0;
    config.hatch.hatch_distance = 0.5;
    config.machine.precision = 3;
    config
}

fn write_input(dir: &Path, mesh: &Mesh) -> std::path::PathBuf {
    let path = dir.join("input.stl");
    mesh.save(&path).unwrap();
    path
}

// =============================================================================
// Stage scenarios
// =============================================================================

#[test]
fn test_cube_slices_into_five_squares() {
    let mesh = create_test_cube(10.0);
    let config = SliceConfig {
        layer_thickness: 2.0,
        ..SliceConfig::default()
    };
    let result = slice_mesh(&mesh, &config, None);

    assert_eq!(result.layers.len(), 5);
    assert!(result.report.is_clean());
    for (i, layer) in result.layers.iter().enumerate() {
        assert_eq!(layer.index, i + 1);
        assert_relative_eq!(layer.z, 2.0 * (i + 1) as f64, epsilon = 1e-9);
        assert_eq!(layer.contours.len(), 1);
        let square = &layer.contours[0];
        assert_eq!(square.points.len(), 4);
        assert_relative_eq!(square.signed_area(), 100.0, epsilon = 1e-9);
    }
}

#[test]
fn test_convex_slice_has_closed_contour() {
    let mesh = create_test_cube(3.0);
    let result = slice_mesh(
        &mesh,
        &SliceConfig {
            layer_thickness: 0.7,
            ..SliceConfig::default()
        },
        None,
    );
    for layer in &result.layers {
        assert!(!layer.contours.is_empty(), "layer {} is empty", layer.index);
    }
}

#[test]
fn test_supports_leave_cube_untouched() {
    let mesh = create_test_cube(10.0);
    let result = generate_supports(&mesh, 55.0, &SupportParams::default()).unwrap();
    assert_eq!(result.mesh, mesh);
    assert!(result.blocks.is_empty());
}

#[test]
fn test_tab_support_depends_on_overhang_angle() {
    let mesh = create_tab_part();
    let supported = generate_supports(&mesh, 30.0, &SupportParams::default()).unwrap();
    assert!(!supported.blocks.is_empty());
    assert!(check_integrity(&supported.mesh).is_sound());

    let unsupported = generate_supports(&mesh, 60.0, &SupportParams::default()).unwrap();
    assert!(unsupported.blocks.is_empty());
    assert_eq!(unsupported.mesh, mesh);
}

#[test]
fn test_collinear_touching_segments_become_one() {
    let out = simplify(
        &[
            Segment::from_coords(0.0, 0.0, 1.0, 1.0),
            Segment::from_coords(1.0, 1.0, 3.0, 3.0),
        ],
        &SimplifyParams::default(),
    );
    assert_eq!(out, vec![Segment::from_coords(0.0, 0.0, 3.0, 3.0)]);
}

#[test]
fn test_machine_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("part_layer0001.txt");
    let segments = vec![
        Segment::from_coords(0.1234, 5.6789, -3.0, 2.0),
        Segment::from_coords(7.0, 7.0, 7.5, 7.0),
    ];
    write_machine_file(&segments, &path, 3).unwrap();
    let parsed = read_machine_file(&path).unwrap();
    assert_eq!(parsed.len(), segments.len());
    for (a, b) in segments.iter().zip(&parsed) {
        assert_relative_eq!(a.start, b.start, epsilon = 1e-3);
        assert_relative_eq!(a.end, b.end, epsilon = 1e-3);
    }
}

#[test]
fn test_missing_layer_three_of_ten_is_fatal() {
    let dir = TempDir::new().unwrap();
    for index in (1..=10).filter(|&i| i != 3) {
        let segments = [Segment::from_coords(0.0, 0.0, index as f64, 1.0)];
        write_machine_file(&segments, &dir.path().join(layer_file_name("part", index, "txt")), 3)
            .unwrap();
    }
    match scan_layer_files(dir.path(), "part", "txt", Some(10)) {
        Err(PrepError::MissingLayerFile { index, .. }) => assert_eq!(index, 3),
        other => panic!("Expected MissingLayerFile for layer 3, got {:?}", other),
    }
}

// =============================================================================
// Full pipeline
// =============================================================================

#[test]
fn test_pipeline_end_to_end() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), &create_test_cube(10.0));
    let model_dir = dir.path().join("cube");

    let plan = PipelinePlan::new(&model_dir).with_input(&input);
    let report = Pipeline::new(test_config()).run(&plan).unwrap();

    assert_eq!(report.stages_executed, Stage::ALL.to_vec());
    assert_eq!(report.support_blocks, Some(0));
    assert_eq!(report.layers_of(Stage::Slice), Some(5));
    assert_eq!(report.layers_of(Stage::Clean), Some(5));
    assert_eq!(report.layers_of(Stage::Encode), Some(5));
    assert_eq!(report.batch.count(IssueSeverity::Error), 0);

    let raw = LayerSet::open(model_dir.join("raw_layers")).unwrap();
    assert_eq!(raw.kind(), LayerSetKind::Raw);
    let clean = LayerSet::open(model_dir.join("clean_layers")).unwrap();
    assert_eq!(clean.kind(), LayerSetKind::Clean);
    assert_eq!(clean.model(), "cube");

    // Contour edges plus fill, all inside the cube footprint
    let first = read_machine_file(&model_dir.join("machine").join("cube_layer0001.txt")).unwrap();
    assert!(first.len() > 4);
    for s in &first {
        for p in [s.start, s.end] {
            assert!((-1e-9..=10.0 + 1e-9).contains(&p.x));
            assert!((-1e-9..=10.0 + 1e-9).contains(&p.y));
        }
    }

    let (path, params) = report.parameters.unwrap();
    assert!(path.ends_with("cube_machine_parameters.txt"));
    assert_eq!(params.get("PART NAME"), Some("cube"));
    assert_eq!(params.get("NUMBER OF LAYERS"), Some("5"));
    assert_eq!(params.get("LAYER THICKNESS"), Some("2.0"));
    assert_eq!(params.get("MINX"), Some("0.0"));
    assert_eq!(params.get("MAXX"), Some("10.0"));
    assert_eq!(params.get("MINY"), Some("0.0"));
    assert_eq!(params.get("MAXY"), Some("10.0"));
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("[PART NAME]\ncube\n"));
}

#[test]
fn test_pipeline_resumes_from_encode() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), &create_test_cube(10.0));
    let model_dir = dir.path().join("cube");
    let pipeline = Pipeline::new(test_config());

    pipeline
        .run(&PipelinePlan::new(&model_dir).with_input(&input).ending_at(Stage::Clean))
        .unwrap();
    assert!(!model_dir.join("machine").exists());

    let report = pipeline
        .run(&PipelinePlan::new(&model_dir).starting_at(Stage::Encode))
        .unwrap();
    assert_eq!(report.stages_executed, vec![Stage::Encode, Stage::Parameters]);
    assert!(model_dir.join("cube_machine_parameters.txt").is_file());
}

#[test]
fn test_pipeline_refuses_missing_upstream_output() {
    let dir = TempDir::new().unwrap();
    let plan = PipelinePlan::new(dir.path().join("nothing")).starting_at(Stage::Clean);
    match Pipeline::new(test_config()).run(&plan) {
        Err(PrepError::MissingStageInput { stage, path }) => {
            assert_eq!(stage, "clean");
            assert!(path.ends_with("raw_layers"));
        }
        other => panic!("Expected MissingStageInput, got {:?}", other),
    }
}

#[test]
fn test_malformed_layer_is_reported_not_fatal() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), &create_test_cube(10.0));
    let model_dir = dir.path().join("cube");
    let pipeline = Pipeline::new(test_config());
    pipeline
        .run(&PipelinePlan::new(&model_dir).with_input(&input).ending_at(Stage::Slice))
        .unwrap();

    std::fs::write(
        model_dir.join("raw_layers").join("cube_layer0003.dxf"),
        "  0\nSECTION\n  2\nENTITIES\n  0\nLINE\n 10\nabc\n",
    )
    .unwrap();

    let report = pipeline
        .run(&PipelinePlan::new(&model_dir).only(Stage::Clean))
        .unwrap();
    assert_eq!(report.layers_of(Stage::Clean), Some(4));
    assert!(matches!(
        report.batch.issues.as_slice(),
        [LayerIssue::MalformedLayer { index: 3, .. }]
    ));

    // The parameter report needs every layer
    let result = pipeline.run(&PipelinePlan::new(&model_dir).starting_at(Stage::Encode));
    assert!(matches!(result, Err(PrepError::MissingLayerFile { index: 3, .. })));
}

#[test]
fn test_unreadable_last_layer_is_still_counted() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), &create_test_cube(10.0));
    let model_dir = dir.path().join("cube");
    let pipeline = Pipeline::new(test_config());
    pipeline
        .run(&PipelinePlan::new(&model_dir).with_input(&input).ending_at(Stage::Slice))
        .unwrap();

    std::fs::write(
        model_dir.join("raw_layers").join("cube_layer0005.dxf"),
        "  0\nSECTION\n  2\nENTITIES\n  0\nLINE\n 10\nabc\n",
    )
    .unwrap();

    // Layers 1 to 4 encode fine, but the sliced set had five
    let result = pipeline.run(&PipelinePlan::new(&model_dir).starting_at(Stage::Clean));
    assert!(matches!(result, Err(PrepError::MissingLayerFile { index: 5, .. })));
}

#[test]
fn test_rerun_does_not_count_stale_machine_files() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), &create_test_cube(10.0));
    let model_dir = dir.path().join("cube");
    let pipeline = Pipeline::new(test_config());
    pipeline
        .run(&PipelinePlan::new(&model_dir).with_input(&input))
        .unwrap();
    let machine_dir = model_dir.join("machine");
    assert!(machine_dir.join(layer_file_name("cube", 3, "txt")).exists());

    std::fs::write(
        model_dir.join("raw_layers").join("cube_layer0003.dxf"),
        "  0\nSECTION\n  2\nENTITIES\n  0\nLINE\n 10\nabc\n",
    )
    .unwrap();

    let result = pipeline.run(&PipelinePlan::new(&model_dir).starting_at(Stage::Clean));
    assert!(matches!(result, Err(PrepError::MissingLayerFile { index: 3, .. })));
    assert!(!machine_dir.join(layer_file_name("cube", 3, "txt")).exists());
    assert!(!model_dir.join("clean_layers").join("cube_layer0003.dxf").exists());
}

#[test]
fn test_preview_and_disabled_supports() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), &create_tab_part());
    let model_dir = dir.path().join("tab");

    let mut config = test_config();
    config.support.enabled = false;
    config.hatch.enabled = false;
    config.simplify.preview = true;
    let report = Pipeline::new(config)
        .run(&PipelinePlan::new(&model_dir).with_input(&input).ending_at(Stage::Clean))
        .unwrap();
    assert_eq!(report.support_blocks, Some(0));

    let preview = Mesh::load(model_dir.join("preview.stl")).unwrap();
    let (min, max) = preview.bounds().unwrap();
    assert_relative_eq!(min.z, 0.0, epsilon = 1e-5);
    assert_relative_eq!(max.z, 10.0, epsilon = 1e-5);
    assert!(preview.volume() > 0.0);
}

#[test]
fn test_machine_extension_does_not_change_content() {
    let dir = TempDir::new().unwrap();
    let input = write_input(dir.path(), &create_test_cube(10.0));

    let mut txt = test_config();
    txt.machine.extension = "txt".into();
    let mut dxf = test_config();
    dxf.machine.extension = "dxf".into();

    let a = dir.path().join("a");
    let b = dir.path().join("b");
    Pipeline::new(txt)
        .run(&PipelinePlan::new(&a).with_input(&input).ending_at(Stage::Encode))
        .unwrap();
    Pipeline::new(dxf)
        .run(&PipelinePlan::new(&b).with_input(&input).ending_at(Stage::Encode))
        .unwrap();

    let first = std::fs::read_to_string(a.join("machine").join("a_layer0002.txt")).unwrap();
    let second = std::fs::read_to_string(b.join("machine").join("b_layer0002.dxf")).unwrap();
    assert_eq!(first, second);
}
