//! Slot cache hook test; runs alone in its own binary so the global counter is not shared.

#![cfg(feature = "test-hooks")]

use image::{Rgba, RgbaImage};

use photoframe_core::slots::{get_locate_call_count, reset_locate_call_count};
use photoframe_core::{
    CompositionPipeline, EngineConfig, RenderRequest, Template, TemplateCatalog, TemplateSource,
};

#[test]
fn catalog_locates_each_template_once() {
    let mut img = RgbaImage::from_pixel(60, 30, Rgba([0, 0, 0, 255]));
    for y in 5..25 {
        for x in 5..25 {
            img.put_pixel(x, y, Rgba([0, 0, 0, 0]));
        }
    }
    let mut catalog = TemplateCatalog::new();
    catalog.register(Template::from_image("single.png", img));
    let pipeline = CompositionPipeline::new(catalog, EngineConfig::default()).unwrap();

    reset_locate_call_count();
    let request = RenderRequest::new(TemplateSource::Named("single.png".into()));
    pipeline.render(&request).unwrap();
    pipeline.render(&request).unwrap();
    pipeline.catalog().list(&pipeline.config().locator);
    assert_eq!(get_locate_call_count(), 1);

    let uploaded = RenderRequest::new(TemplateSource::Uploaded {
        name: "single.png".into(),
        bytes: {
            let mut buf = Vec::new();
            image::DynamicImage::ImageRgba8(pipeline.catalog().get("single.png").unwrap().image().clone())
                .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
                .unwrap();
            buf
        },
    });
    pipeline.render(&uploaded).unwrap();
    assert_eq!(get_locate_call_count(), 2);
}
