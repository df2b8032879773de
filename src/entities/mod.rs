pub mod inventory_movement;
pub mod inventory_stock;
pub mod order_number_sequence;
pub mod part_line_item;
pub mod payment;
pub mod point_of_sale_item;
pub mod service_order;
