use image::{Rgb, RgbImage};

use ks_net::region::Region;
use ks_runtime::{draw_regions, image_to_tensor, Preprocess};

fn two_pixels() -> RgbImage {
    let mut image = RgbImage::new(2, 1);
    image.put_pixel(0, 0, Rgb([10, 20, 30]));
    image.put_pixel(1, 0, Rgb([40, 50, 60]));
    image
}

#[test]
fn planar_rgb() {
    let tensor = image_to_tensor(&two_pixels(), &Preprocess::default());
    assert_eq!(tensor.shape(), &[1, 3, 1, 2]);

    let expected = [10.0, 40.0, 20.0, 50.0, 30.0, 60.0].map(|x: f32| x / 255.0);
    for (&a, &e) in tensor.f32_data().iter().zip(&expected) {
        assert!((a - e).abs() < 1e-6, "got {}, expected {}", a, e);
    }
}

#[test]
fn bgr_with_mean() {
    let preprocess = Preprocess {
        scale: 1.0,
        mean: [1.0, 2.0, 3.0],
        bgr: true,
    };
    let tensor = image_to_tensor(&two_pixels(), &preprocess);
    assert_eq!(tensor.f32_data(), &[29.0, 59.0, 18.0, 48.0, 7.0, 37.0]);
}

#[test]
fn draw_outline() {
    let mut image = RgbImage::new(5, 5);
    draw_regions(&mut image, &[Region::new(2.0, 2.0, 2.0, 2.0, 0, 0.9)]);

    let black = Rgb([0, 0, 0]);
    assert_ne!(*image.get_pixel(1, 1), black);
    assert_ne!(*image.get_pixel(3, 2), black);
    assert_eq!(*image.get_pixel(2, 2), black);
    assert_eq!(*image.get_pixel(0, 0), black);
    assert_eq!(*image.get_pixel(4, 4), black);
}

#[test]
fn draw_clamps_to_image() {
    let mut image = RgbImage::new(3, 3);
    draw_regions(&mut image, &[Region::new(0.0, 0.0, 100.0, 100.0, 7, 0.5)]);
    assert_ne!(*image.get_pixel(0, 0), Rgb([0, 0, 0]));
    assert_ne!(*image.get_pixel(2, 2), Rgb([0, 0, 0]));
}
