//! Builds a camera, projects a few world points and back-projects them to rays.

use camsync_geometry::{DepthMap, DepthSampling, Intrinsics, Pose, build_projection, pixels_to_points};
use nalgebra::{Matrix2xX, Matrix3xX, UnitQuaternion, Vector2, Vector3};

fn main() {
    println!("=== camsync-geometry projection example ===\n");

    let intrinsics = Intrinsics::new(525.0, 525.0, 319.5, 239.5);
    let pose = Pose::new(
        Vector3::new(0.0, 0.0, -2.0),
        UnitQuaternion::from_euler_angles(0.0, 0.1, 0.0),
    );
    println!("Camera: {}", pose);
    println!("        {}\n", intrinsics);

    let projection = match build_projection(&pose, &intrinsics) {
        Ok(projection) => projection,
        Err(e) => {
            eprintln!("Failed to build projection: {}", e);
            return;
        }
    };

    let points = Matrix3xX::from_columns(&[
        Vector3::new(0.0, 0.0, 1.0),
        Vector3::new(0.5, -0.2, 2.0),
        Vector3::new(-1.0, 0.4, 3.0),
    ]);
    let uv = projection.project(&points);
    let rays = match projection.unproject_rays(&uv) {
        Ok(rays) => rays,
        Err(e) => {
            eprintln!("Failed to back-project: {}", e);
            return;
        }
    };

    for i in 0..points.ncols() {
        let point = points.column(i);
        let expected = (point - projection.camera_center()).normalize();
        println!(
            "Point ({:>5.2}, {:>5.2}, {:>5.2}) -> pixel ({:>7.2}, {:>7.2}) -> ray error {:.2e}",
            point[0],
            point[1],
            point[2],
            uv[(0, i)],
            uv[(1, i)],
            (rays.column(i) - expected).norm()
        );
    }

    println!("\nDepth unprojection (flat wall at 1.5 m):");
    let depth = match DepthMap::new(640, 480, vec![1500; 640 * 480]) {
        Ok(depth) => depth,
        Err(e) => {
            eprintln!("Invalid depth map: {}", e);
            return;
        }
    };
    let pixels = Matrix2xX::from_columns(&[Vector2::new(319.5, 239.5), Vector2::new(100.0, 400.0)]);
    match pixels_to_points(&pixels, &intrinsics, &depth, DepthSampling::Window { radius: 2 }) {
        Ok(points) => {
            for (i, point) in points.iter().enumerate() {
                match point {
                    Some(p) => println!("  pixel {} -> ({:.3}, {:.3}, {:.3})", i, p.x, p.y, p.z),
                    None => println!("  pixel {} -> no depth", i),
                }
            }
        }
        Err(e) => eprintln!("Depth unprojection failed: {}", e),
    }
}
